//! Client death monitoring
//!
//! A transport that notices its client has gone away calls
//! [`ClientLinkMonitor::client_died`]. The monitor only holds a weak
//! reference, so it never keeps a session alive on its own.

use std::sync::Weak;

use tracing::{debug, info};

use crate::session::Session;

/// Death notification target registered by [`Session::link_to_death`]
#[derive(Debug, Clone)]
pub struct ClientLinkMonitor {
    session: Weak<Session>,
}

impl ClientLinkMonitor {
    pub(crate) fn new(session: Weak<Session>) -> Self {
        Self { session }
    }

    /// The client owning the session is gone; close the session if it is
    /// still open.
    ///
    /// Returns `true` if this call closed the session.
    pub fn client_died(&self) -> bool {
        info!("Session client has died");

        let Some(session) = self.session.upgrade() else {
            debug!("Session already dropped");
            return false;
        };
        if !session.is_linked_to_death() || session.is_closed() {
            debug!("Session already closed, nothing to do");
            return false;
        }

        session.close()
    }

    /// Whether the monitored session still exists and is open
    pub fn is_session_open(&self) -> bool {
        self.session
            .upgrade()
            .is_some_and(|session| !session.is_closed())
    }
}
