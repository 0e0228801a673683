//! TLS setup for `wss://` stream endpoints.
//!
//! The WebSocket connector builds its rustls client config from the
//! process-wide crypto provider; this installs the ring provider once so
//! that lookup never fails.

use std::sync::Once;

use tracing::debug;

static INSTALL: Once = Once::new();

/// Installs the ring crypto provider as the process default.
///
/// Safe to call repeatedly. If another provider was installed first it is
/// left in place.
pub fn install_crypto_provider() {
    INSTALL.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            debug!("TLS crypto provider already installed");
        }
    });
}
