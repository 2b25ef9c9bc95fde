//! Service side loop over the hub's file upload notification queue

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::message::FileUploadNotification;

/// Error a notification handler may fail with
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Service side view of the file notification queue
#[async_trait]
pub trait FileNotificationReceiver: Send {
    /// Wait for the next notification, `None` when nothing arrived in the receive window
    async fn receive(
        &mut self,
        cancel: &CancellationToken,
    ) -> crate::Result<Option<FileUploadNotification>>;

    /// Remove a handled notification from the queue
    async fn complete(
        &mut self,
        notification: &FileUploadNotification,
        cancel: &CancellationToken,
    ) -> crate::Result<()>;

    /// Return a notification to the queue for redelivery
    async fn abandon(
        &mut self,
        notification: &FileUploadNotification,
        cancel: &CancellationToken,
    ) -> crate::Result<()>;
}

/// Processes a single notification
#[async_trait]
pub trait NotificationHandler: Send {
    /// Handle `notification`, an error leaves it on the queue
    async fn handle(&mut self, notification: &FileUploadNotification) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F> NotificationHandler for F
where
    F: FnMut(&FileUploadNotification) -> Result<(), HandlerError> + Send,
{
    async fn handle(&mut self, notification: &FileUploadNotification) -> Result<(), HandlerError> {
        self(notification)
    }
}

/// Receives file upload notifications one at a time and completes each once handled
///
/// Delivery is at least once: a notification is only completed after its
/// handler succeeded, so a crash in between leaves it on the queue.
#[derive(Debug)]
pub struct NotificationListener<R, H> {
    receiver: R,
    handler: H,
}

impl<R, H> NotificationListener<R, H>
where
    R: FileNotificationReceiver,
    H: NotificationHandler,
{
    /// Listener pulling from `receiver` into `handler`
    pub fn new(receiver: R, handler: H) -> Self {
        Self { receiver, handler }
    }

    /// Run until `cancel` fires, returning how many notifications were completed
    ///
    /// Receiver errors end the loop.
    pub async fn run(&mut self, cancel: CancellationToken) -> crate::Result<u64> {
        info!("Receiving file upload notifications from service");
        let mut completed = 0;

        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = self.receiver.receive(&cancel) => received?,
            };

            let notification = match received {
                Some(notification) => notification,
                None => {
                    tokio::task::yield_now().await;
                    continue;
                }
            };

            info!(
                "Received file upload notification: {}",
                notification.blob_name
            );

            match self.handler.handle(&notification).await {
                Ok(()) => {
                    self.receiver.complete(&notification, &cancel).await?;
                    completed += 1;
                }
                Err(err) => {
                    warn!(
                        "Failed to handle notification for {}, abandoning: {}",
                        notification.blob_name, err
                    );
                    self.receiver.abandon(&notification, &cancel).await?;
                }
            }
        }

        info!("Stopped receiving file upload notifications");
        Ok(completed)
    }

    /// Give back the receiver and handler
    pub fn into_parts(self) -> (R, H) {
        (self.receiver, self.handler)
    }
}
