//! Scan session orchestration
//!
//! One state machine per device. The desktop owns the session id and
//! receives video; the phone joins by link, streams and captures pages.

pub mod desktop;
pub mod phone;

pub use desktop::{DesktopCollaborators, DesktopSession, DesktopStep, DesktopView, SubmitOutcome};
pub use phone::{PhoneCapabilities, PhoneCommand, PhoneSession, PhoneStep, PhoneView};
