//! Failure classification
//!
//! Decides whether a failed request should start (or join) a credential
//! refresh. Pure predicate: it reads the options and the client's state and
//! never mutates either.

use transport::{ClientId, TransportError};

use crate::options::{RefreshHooks, RefreshOptions};
use crate::state::CoordinationState;

/// Whether `error` qualifies for refresh handling on `client_id`.
///
/// Rules, first match wins:
/// 1. No upstream response → false, unless `intercept_network_error` is set
///    and this is a network error (which then skips rule 3)
/// 2. Request marked `skip_auth_refresh` → false
/// 3. `should_refresh` hook rejects, or (no hook) status not in `status_codes` → false
/// 4. Pausing enabled and the client is already paused → false
/// 5. Otherwise true
pub fn should_refresh(
    error: &TransportError,
    options: &RefreshOptions,
    hooks: &RefreshHooks,
    client_id: ClientId,
    state: &CoordinationState,
) -> bool {
    let network_trigger = options.intercept_network_error && error.is_network();
    if error.response().is_none() && !network_trigger {
        return false;
    }

    if error.config().is_some_and(|config| config.skip_auth_refresh) {
        return false;
    }

    if !network_trigger {
        let qualifies = match &hooks.should_refresh {
            Some(predicate) => predicate(error),
            None => error
                .status()
                .is_some_and(|status| options.triggers_on(status)),
        };
        if !qualifies {
            return false;
        }
    }

    !(options.pauses_client() && state.is_paused(client_id))
}
