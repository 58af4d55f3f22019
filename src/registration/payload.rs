//! Registration payload building.
//!
//! A pure function of a [`SettingsSnapshot`]: no network access, no mutable
//! state, which keeps it deterministic under unit test. The field-gating
//! rules live here and nowhere else.

use serde::Serialize;

use crate::error::Error;
use crate::settings::{self, SettingsSnapshot};
use crate::transport::{Operation, RequestSpec};

/// Quiet-time window as the wire format expects it: "HH:MM" strings.
#[derive(Debug, Serialize)]
struct QuietTimeBody {
    start: String,
    end: String,
}

/// JSON body of a register request. Fields are omitted, not nulled, when
/// their gate is off.
#[derive(Debug, Serialize)]
struct RegistrationBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quiettime: Option<QuietTimeBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tz: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    badge: Option<i32>,
}

/// Build the request a settings snapshot calls for.
///
/// Rules:
/// - push disabled → unregister, empty body, other fields never sent
/// - push enabled + token present → register with the gated body
/// - push enabled + token absent → [`Error::NotReady`]; the caller must
///   wait for the OS to deliver a token
pub fn build_request(snapshot: &SettingsSnapshot) -> Result<RequestSpec, Error> {
    let token = snapshot.device_token.as_deref().ok_or(Error::NotReady)?;
    let token_hex = settings::token_hex(token);

    if !snapshot.push_enabled {
        return Ok(RequestSpec {
            operation: Operation::Unregister,
            token_hex,
            body: None,
        });
    }

    let quiet = snapshot
        .quiet_time
        .filter(|_| snapshot.quiet_time_enabled)
        .map(|window| QuietTimeBody {
            start: window.from.format("%H:%M").to_string(),
            end: window.to.format("%H:%M").to_string(),
        });

    let body = RegistrationBody {
        alias: snapshot.alias.clone(),
        tags: snapshot
            .can_edit_tags_from_device
            .then(|| snapshot.tags.clone()),
        tz: quiet.as_ref().map(|_| snapshot.time_zone.clone()),
        quiettime: quiet,
        badge: snapshot.autobadge_enabled.then_some(snapshot.badge_number),
    };

    Ok(RequestSpec {
        operation: Operation::Register,
        token_hex,
        body: Some(serde_json::to_value(body).map_err(Error::Json)?),
    })
}
