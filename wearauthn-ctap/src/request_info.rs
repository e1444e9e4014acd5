//! Descriptions of actions awaiting the user's approval
//!
//! [`RequestInfo`] only carries display fields. [`describe`] turns it into the
//! plain-text question shown in the confirmation dialog and the message shown
//! once the action succeeded.

/// Action pending confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestInfo {
    Authenticate {
        rp_id: String,
        rp_name: Option<String>,
        user_name: Option<String>,
        user_display_name: Option<String>,
        requires_user_verification: bool,
        /// Several resident credentials are on offer
        uses_resident_key: bool,
    },
    AuthenticateNoCredentials {
        rp_id: String,
        rp_name: Option<String>,
    },
    Register {
        rp_id: String,
        rp_name: Option<String>,
        user_name: Option<String>,
        user_display_name: Option<String>,
        requires_user_verification: bool,
        uses_resident_key: bool,
    },
    RegisterCredentialExcluded {
        rp_id: String,
        rp_name: Option<String>,
    },
    /// The browser asked for something this authenticator cannot provide
    RequirementsNotMetChrome { rp_id: String },
    /// Platform wants a touch to pick this authenticator
    PlatformGetTouch { rp_id: String },
}

impl RequestInfo {
    pub fn rp_id(&self) -> &str {
        match self {
            Self::Authenticate { rp_id, .. }
            | Self::AuthenticateNoCredentials { rp_id, .. }
            | Self::Register { rp_id, .. }
            | Self::RegisterCredentialExcluded { rp_id, .. }
            | Self::RequirementsNotMetChrome { rp_id }
            | Self::PlatformGetTouch { rp_id } => rp_id,
        }
    }
}

/// Text for a pending action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub confirmation: String,
    pub success: String,
}

fn rp_label<'a>(rp_id: &'a str, rp_name: &'a Option<String>) -> &'a str {
    match rp_name.as_deref() {
        Some(name) if !name.is_empty() => name,
        _ => rp_id,
    }
}

fn user_label<'a>(name: &'a Option<String>, display_name: &'a Option<String>) -> Option<&'a str> {
    name.as_deref()
        .filter(|n| !n.is_empty())
        .or_else(|| display_name.as_deref().filter(|n| !n.is_empty()))
}

fn with_notes(question: String, notes: &[&str]) -> String {
    notes.iter().fold(question, |mut text, note| {
        text.push_str("\n\n");
        text.push_str(note);
        text
    })
}

pub fn describe(info: &RequestInfo) -> Prompt {
    match info {
        RequestInfo::Authenticate {
            rp_id,
            rp_name,
            user_name,
            user_display_name,
            requires_user_verification,
            uses_resident_key,
        } => {
            let rp = rp_label(rp_id, rp_name);
            let user = user_label(user_name, user_display_name)
                .map(|u| format!(" as {u}"))
                .unwrap_or_default();
            let mut notes = Vec::new();
            if *requires_user_verification {
                notes.push("You may have to reconfirm your screen lock.");
            }
            if *uses_resident_key {
                notes.push("You will be asked to select an account.");
            }
            Prompt {
                confirmation: with_notes(format!("Authenticate to {rp}{user}?"), &notes),
                success: format!("Authenticated to {rp}{user}"),
            }
        }
        RequestInfo::AuthenticateNoCredentials { .. } => Prompt {
            confirmation: "Reveal that you are not registered?".to_string(),
            success: "Revealed that you are not registered".to_string(),
        },
        RequestInfo::Register {
            rp_id,
            rp_name,
            user_name,
            user_display_name,
            requires_user_verification,
            uses_resident_key,
        } => {
            let rp = rp_label(rp_id, rp_name);
            let user = user_label(user_name, user_display_name)
                .map(|u| format!(" as {u}"))
                .unwrap_or_default();
            let mut notes = Vec::new();
            if *requires_user_verification {
                notes.push(
                    "You may have to reconfirm your screen lock to log in and lose access if you disable it.",
                );
            }
            if *uses_resident_key {
                notes.push("Your association with the site will be stored on your watch.");
            }
            let warning = if *requires_user_verification {
                ". Do not disable the screen lock."
            } else {
                ""
            };
            Prompt {
                confirmation: with_notes(format!("Register with {rp}{user}?"), &notes),
                success: format!("Registered with {rp}{user}{warning}"),
            }
        }
        RequestInfo::RegisterCredentialExcluded { rp_id, rp_name } => {
            let rp = rp_label(rp_id, rp_name);
            Prompt {
                confirmation: format!("Reveal previous registration or error with {rp}?"),
                success: format!("Revealed previous registration or error with {rp}"),
            }
        }
        RequestInfo::RequirementsNotMetChrome { .. } => Prompt {
            confirmation: "You are not registered to the site or it requires single-factor mode to be enabled. Show a more detailed error message in the browser?".to_string(),
            success: "Not registered or error encountered".to_string(),
        },
        RequestInfo::PlatformGetTouch { .. } => Prompt {
            confirmation: "Confirm this authenticator?".to_string(),
            success: "Authenticator confirmed".to_string(),
        },
    }
}
