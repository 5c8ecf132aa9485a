//! Clinical record types exchanged with the extraction and record-store
//! collaborators, plus the editable form the physician reviews.

use crate::session::SessionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reference to a completed scan, handed to extraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReference {
    pub session_id: SessionId,
    pub total_pages: u32,
}

/// Medication as returned by extraction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dosage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
}

/// Structured values read off a discharge document
///
/// Every field is optional: extraction reports what it could find.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractedRecord {
    pub patient_name: Option<String>,
    pub discharge_date: Option<String>,

    pub weight_admission_kg: Option<f64>,
    pub weight_discharge_kg: Option<f64>,
    pub resting_heart_rate_bpm: Option<f64>,
    pub heart_rhythm: Option<String>,
    pub blood_pressure: Option<String>,
    pub nyha_class: Option<String>,

    pub ejection_fraction_pct: Option<f64>,
    pub lv_assessment_method: Option<String>,
    pub lv_assessment_date: Option<String>,

    pub potassium: Option<f64>,
    pub sodium: Option<f64>,
    pub urea: Option<f64>,
    pub creatinine: Option<f64>,
    pub egfr: Option<f64>,

    pub medications: Option<Vec<Medication>>,

    pub patient_specific_instructions: Option<String>,
    pub care_plan_notes: Option<String>,
    pub follow_up_date: Option<String>,
    pub follow_up_instructions: Option<String>,

    pub diagnosis: Option<String>,
}

/// Editable medication row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MedicationRow {
    pub name: String,
    pub dosage: String,
    pub frequency: String,
}

impl MedicationRow {
    /// `name - dosage - frequency`, skipping blank parts
    pub fn summary(&self) -> String {
        [&self.name, &self.dosage, &self.frequency]
            .into_iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" - ")
    }
}

impl From<&Medication> for MedicationRow {
    fn from(m: &Medication) -> Self {
        Self {
            name: m.name.clone(),
            dosage: m.dosage.clone().unwrap_or_default(),
            frequency: m.frequency.clone().unwrap_or_default(),
        }
    }
}

/// Review form state: every value is the text the physician sees
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditableRecord {
    pub name: String,
    pub email: String,
    pub care_pathway_id: String,
    pub discharge_date: String,

    pub weight_admission_kg: String,
    pub weight_discharge_kg: String,
    pub resting_heart_rate_bpm: String,
    pub heart_rhythm: String,
    pub blood_pressure: String,
    pub nyha_class: String,

    pub ejection_fraction_pct: String,
    pub lv_assessment_method: String,
    pub lv_assessment_date: String,

    pub potassium: String,
    pub sodium: String,
    pub urea: String,
    pub creatinine: String,
    pub egfr: String,

    pub medications: Vec<MedicationRow>,

    pub patient_specific_instructions: String,
    pub care_plan_notes: String,
    pub follow_up_date: String,
    pub follow_up_instructions: String,
    pub diagnosis: String,
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn number(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl EditableRecord {
    /// Pre-populate the form from extraction output
    pub fn from_extracted(extracted: &ExtractedRecord, default_pathway: Option<&str>) -> Self {
        Self {
            name: text(&extracted.patient_name),
            email: String::new(),
            care_pathway_id: default_pathway.unwrap_or_default().to_string(),
            discharge_date: text(&extracted.discharge_date),
            weight_admission_kg: number(extracted.weight_admission_kg),
            weight_discharge_kg: number(extracted.weight_discharge_kg),
            resting_heart_rate_bpm: number(extracted.resting_heart_rate_bpm),
            heart_rhythm: text(&extracted.heart_rhythm),
            blood_pressure: text(&extracted.blood_pressure),
            nyha_class: text(&extracted.nyha_class),
            ejection_fraction_pct: number(extracted.ejection_fraction_pct),
            lv_assessment_method: text(&extracted.lv_assessment_method),
            lv_assessment_date: text(&extracted.lv_assessment_date),
            potassium: number(extracted.potassium),
            sodium: number(extracted.sodium),
            urea: number(extracted.urea),
            creatinine: number(extracted.creatinine),
            egfr: number(extracted.egfr),
            medications: extracted
                .medications
                .iter()
                .flatten()
                .map(MedicationRow::from)
                .collect(),
            patient_specific_instructions: text(&extracted.patient_specific_instructions),
            care_plan_notes: text(&extracted.care_plan_notes),
            follow_up_date: text(&extracted.follow_up_date),
            follow_up_instructions: text(&extracted.follow_up_instructions),
            diagnosis: text(&extracted.diagnosis),
        }
    }

    /// Build the record-store payload
    ///
    /// Blank optional values are dropped; clinical values travel in
    /// `clinical_data` with blanks as null.
    pub fn to_confirm_input(&self, scan_id: Option<&str>) -> ConfirmPatientInput {
        let clinical = [
            ("weight_admission_kg", &self.weight_admission_kg),
            ("weight_discharge_kg", &self.weight_discharge_kg),
            ("resting_heart_rate_bpm", &self.resting_heart_rate_bpm),
            ("heart_rhythm", &self.heart_rhythm),
            ("blood_pressure", &self.blood_pressure),
            ("nyha_class", &self.nyha_class),
            ("ejection_fraction_pct", &self.ejection_fraction_pct),
            ("lv_assessment_method", &self.lv_assessment_method),
            ("lv_assessment_date", &self.lv_assessment_date),
            ("potassium", &self.potassium),
            ("sodium", &self.sodium),
            ("urea", &self.urea),
            ("creatinine", &self.creatinine),
            ("egfr", &self.egfr),
            (
                "patient_specific_instructions",
                &self.patient_specific_instructions,
            ),
            ("care_plan_notes", &self.care_plan_notes),
            ("follow_up_instructions", &self.follow_up_instructions),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), non_empty(value)))
        .collect();

        ConfirmPatientInput {
            scan_id: scan_id.and_then(non_empty),
            name: self.name.trim().to_string(),
            email: non_empty(&self.email),
            discharge_date: non_empty(&self.discharge_date),
            diagnosis: non_empty(&self.diagnosis),
            medications: self
                .medications
                .iter()
                .filter(|m| !m.name.trim().is_empty())
                .map(MedicationRow::summary)
                .collect(),
            restrictions: non_empty(&self.patient_specific_instructions),
            follow_up_date: non_empty(&self.follow_up_date),
            care_pathway_id: self.care_pathway_id.trim().to_string(),
            clinical_data: clinical,
        }
    }
}

/// Physician-confirmed record submitted to the record store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmPatientInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_id: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discharge_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
    #[serde(default)]
    pub medications: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restrictions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_up_date: Option<String>,
    pub care_pathway_id: String,
    #[serde(default)]
    pub clinical_data: BTreeMap<String, Option<String>>,
}

impl ConfirmPatientInput {
    /// Required-field checks, run before the record store is called
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::default();
        if self.name.is_empty() {
            errors.add("name", "Patient name is required");
        }
        if self.care_pathway_id.is_empty() {
            errors.add("care_pathway_id", "Care pathway is required");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Field-keyed validation messages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    /// Key used for errors not tied to a single field
    pub const FORM: &'static str = "form";

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    /// A single form-level message
    pub fn form(message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.add(Self::FORM, message);
        errors
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{}: {}", field, message)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl std::error::Error for FieldErrors {}
