//! SAM session bootstrap.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::error::{NetworkError, NetworkResult};
use crate::state::{I2pSessionInfo, State};

use super::sam::{expect_ok, parse_reply, SamStream};
use super::util::{b32_from_pub, pub_from_priv};

/// Creates the STREAM session every dialer and the listener attach to.
/// The control socket must stay open for the session's lifetime, so it is
/// parked on a background task until shutdown.
pub struct I2pController {
    state: Arc<State>,
}

impl I2pController {
    pub fn new(state: Arc<State>) -> Self {
        Self { state }
    }

    /// Establishes the session and publishes [`I2pSessionInfo`] into the
    /// shared state. Returns the task keeping the control socket alive.
    pub async fn start(self) -> NetworkResult<tokio::task::JoinHandle<()>> {
        let config = &self.state.config.i2p;
        let mut control = SamStream::connect(&config.sam_host, config.sam_port).await?;
        control.hello().await?;

        let nick = format!("bmnode-{:08x}", rand::thread_rng().gen::<u32>());
        let transient = config.transient;
        // The bridge generates a key when asked for TRANSIENT and hands
        // it back in the reply, so a missing key file resolves itself
        let destination = if transient {
            "TRANSIENT".to_string()
        } else {
            self.load_private_key().unwrap_or_else(|| "TRANSIENT".to_string())
        };

        control
            .send_line(&format!(
                "SESSION CREATE STYLE=STREAM ID={} DESTINATION={}\n",
                nick, destination
            ))
            .await?;
        let reply = control.read_line(Duration::from_secs(60)).await?;
        expect_ok(&reply)?;
        let fields = parse_reply(&reply);
        let dest_priv = fields
            .get("DESTINATION")
            .ok_or_else(|| NetworkError::sam("no destination in session reply"))?
            .clone();

        if !transient {
            self.store_private_key(&dest_priv);
        }

        let dest_pub = pub_from_priv(&dest_priv)?;
        let b32 = b32_from_pub(&dest_pub)?;
        info!("i2p session up, our address is {}", b32);

        *self.state.i2p_session.write() = Some(I2pSessionInfo {
            nick,
            dest_pub,
            b32,
            transient,
        });

        let state = self.state.clone();
        Ok(tokio::spawn(async move {
            // The bridge tears the session down when this socket closes
            let _control = control;
            while !state.shutting_down() {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }))
    }

    fn load_private_key(&self) -> Option<String> {
        match std::fs::read_to_string(self.state.i2p_key_path()) {
            Ok(key) => {
                let key = key.trim().to_string();
                if key.is_empty() {
                    None
                } else {
                    Some(key)
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("error while loading the i2p key: {}", e);
                None
            }
        }
    }

    fn store_private_key(&self, key: &str) {
        if let Err(e) = std::fs::write(self.state.i2p_key_path(), key) {
            warn!("error while saving the i2p key: {}", e);
        }
    }
}
