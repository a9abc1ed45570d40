//! # LogWriter: renders bus events as tracing lines.
//!
//! ## Example output (fmt layer)
//! ```text
//! INFO service status changed service=NodeLinkService node_id=7 from=Pending to=Active
//! INFO stream status changed service=NodeLinkService stream=InvoiceStream node_id=7 from=Inactive to=Active
//! WARN subscriber overflow subscriber="notifier" reason="full"
//! ERROR core service died
//! ```

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        match e.kind {
            EventKind::ServiceStatusChanged => {
                let Some(ch) = &e.service else { return };
                match ch.stream {
                    Some(stream) => info!(
                        service = %ch.service, %stream, node_id = ch.node_id,
                        from = %ch.previous, to = %ch.status,
                        "stream status changed"
                    ),
                    None => info!(
                        service = %ch.service, node_id = ch.node_id,
                        from = %ch.previous, to = %ch.status,
                        "service status changed"
                    ),
                }
            }
            EventKind::SubscriberOverflow => {
                warn!(subscriber = ?e.subscriber, reason = ?e.reason, "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                error!(subscriber = ?e.subscriber, info = ?e.reason, "subscriber panicked");
            }
            EventKind::ShutdownRequested => info!("shutdown requested"),
            EventKind::AllStoppedWithin => info!("all services stopped within grace"),
            EventKind::GraceExceeded => warn!(stuck = ?e.reason, "grace exceeded"),
            EventKind::CoreServiceDied => error!("core service died"),
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
