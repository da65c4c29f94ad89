use tracing::info;

use crate::error::Result;
use crate::message::Notification;

/// Facilities provided by the hosting runtime rather than the worker.
pub trait Platform: Send + Sync {
    /// Take control of open pages without a reload. Returns how many.
    fn claim_clients(&self) -> Result<usize>;

    /// Ask the runtime to activate this worker without waiting for the
    /// previous one to go idle.
    fn skip_waiting(&self) -> Result<()>;

    fn show_notification(&self, notification: &Notification) -> Result<()>;

    /// Open, or focus if already open, a window at `url`.
    fn open_window(&self, url: &str) -> Result<()>;
}

/// Platform for headless hosts: every call is recorded in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPlatform;

impl Platform for LoggingPlatform {
    fn claim_clients(&self) -> Result<usize> {
        info!("Claiming clients");
        Ok(0)
    }

    fn skip_waiting(&self) -> Result<()> {
        info!("Skip waiting requested");
        Ok(())
    }

    fn show_notification(&self, notification: &Notification) -> Result<()> {
        info!(
            title = %notification.title,
            body = %notification.body,
            url = %notification.url,
            "Showing notification"
        );
        Ok(())
    }

    fn open_window(&self, url: &str) -> Result<()> {
        info!(url = url, "Opening window");
        Ok(())
    }
}
