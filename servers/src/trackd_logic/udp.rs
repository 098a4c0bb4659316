use lib_trackd::auth::{parse_datagram, ReplyCode};
use lib_trackd::core::Event;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::trackd_logic::state::{unix_now, AppState};

/// Largest datagram read in one go.
const RECV_BUFFER: usize = 2048;

/// Turns one datagram into an event, or the reason it is dropped.
pub fn datagram_event(state: &AppState, text: &str, now: i64) -> Result<Event, ReplyCode> {
    let fields = parse_datagram(text)?;
    if state.verify_udp {
        state.authenticator.verify(&fields.query)?;
    }
    Ok(Event::new(fields.op, fields.trk_id, format!("t={now}&{text}")))
}

/// Receives beacons until `shutdown` fires. Nothing is ever sent back.
pub async fn run(socket: UdpSocket, state: AppState, shutdown: CancellationToken) {
    if let Ok(addr) = socket.local_addr() {
        tracing::info!("UDP listener on {}", addr);
    }
    let mut buf = vec![0u8; RECV_BUFFER];

    loop {
        let (len, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    tracing::warn!("UDP receive error: {}", e);
                    continue;
                }
            },
        };
        state.counters.record();

        let Ok(text) = std::str::from_utf8(&buf[..len]) else {
            tracing::debug!("dropped non UTF-8 datagram from {}", peer);
            continue;
        };
        let text = text.trim_end_matches(['\r', '\n', '\0']);
        match datagram_event(&state, text, unix_now()) {
            Ok(event) => {
                state.dispatcher.route(event).await;
            }
            Err(code) => {
                tracing::debug!("dropped datagram from {}: {}", peer, code.message());
            }
        }
    }
    tracing::info!("UDP listener stopped");
}
