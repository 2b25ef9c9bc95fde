use std::collections::VecDeque;

use async_trait::async_trait;
use azure_iot_file_upload::{
    FileNotificationReceiver, FileUploadNotification, HandlerError, IoTHubError,
    NotificationHandler, NotificationListener,
};
use tokio_util::sync::CancellationToken;

enum Delivery {
    Nothing,
    Notification(&'static str),
    Error,
}

/// Plays back a fixed script of deliveries, then cancels the listener
struct ScriptedReceiver {
    script: VecDeque<Delivery>,
    calls: Vec<String>,
}

impl ScriptedReceiver {
    fn new(script: Vec<Delivery>) -> Self {
        Self {
            script: script.into(),
            calls: Vec::new(),
        }
    }
}

#[async_trait]
impl FileNotificationReceiver for ScriptedReceiver {
    async fn receive(
        &mut self,
        cancel: &CancellationToken,
    ) -> azure_iot_file_upload::Result<Option<FileUploadNotification>> {
        self.calls.push("receive".to_string());
        match self.script.pop_front() {
            Some(Delivery::Nothing) => Ok(None),
            Some(Delivery::Notification(blob_name)) => Ok(Some(
                FileUploadNotification {
                    blob_name: blob_name.to_string(),
                    ..Default::default()
                }
                .with_lock_token(format!("lock-{}", blob_name)),
            )),
            Some(Delivery::Error) => Err(IoTHubError::Other("link detached".into())),
            None => {
                cancel.cancel();
                Ok(None)
            }
        }
    }

    async fn complete(
        &mut self,
        notification: &FileUploadNotification,
        _cancel: &CancellationToken,
    ) -> azure_iot_file_upload::Result<()> {
        self.calls.push(format!("complete {}", notification.lock_token));
        Ok(())
    }

    async fn abandon(
        &mut self,
        notification: &FileUploadNotification,
        _cancel: &CancellationToken,
    ) -> azure_iot_file_upload::Result<()> {
        self.calls.push(format!("abandon {}", notification.lock_token));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingHandler {
    handled: Vec<String>,
    reject: Option<&'static str>,
}

#[async_trait]
impl NotificationHandler for RecordingHandler {
    async fn handle(&mut self, notification: &FileUploadNotification) -> Result<(), HandlerError> {
        self.handled.push(notification.blob_name.clone());
        if self.reject == Some(notification.blob_name.as_str()) {
            return Err("cannot process blob".into());
        }
        Ok(())
    }
}

#[tokio::test]
async fn each_notification_is_completed_before_next_receive() {
    let receiver = ScriptedReceiver::new(vec![
        Delivery::Nothing,
        Delivery::Notification("device-1/a.txt"),
        Delivery::Nothing,
        Delivery::Notification("device-1/b.txt"),
        Delivery::Notification("device-1/c.txt"),
    ]);
    let mut listener = NotificationListener::new(receiver, RecordingHandler::default());

    let completed = listener.run(CancellationToken::new()).await.unwrap();

    let (receiver, handler) = listener.into_parts();
    assert_eq!(completed, 3);
    assert_eq!(
        receiver.calls,
        vec![
            "receive",
            "receive",
            "complete lock-device-1/a.txt",
            "receive",
            "receive",
            "complete lock-device-1/b.txt",
            "receive",
            "complete lock-device-1/c.txt",
            "receive",
        ]
    );
    assert_eq!(
        handler.handled,
        vec!["device-1/a.txt", "device-1/b.txt", "device-1/c.txt"]
    );
}

#[tokio::test]
async fn failed_handling_abandons_instead_of_completing() {
    let receiver = ScriptedReceiver::new(vec![
        Delivery::Notification("device-1/a.txt"),
        Delivery::Notification("device-1/b.txt"),
    ]);
    let handler = RecordingHandler {
        reject: Some("device-1/a.txt"),
        ..Default::default()
    };
    let mut listener = NotificationListener::new(receiver, handler);

    let completed = listener.run(CancellationToken::new()).await.unwrap();

    let (receiver, _) = listener.into_parts();
    assert_eq!(completed, 1);
    assert_eq!(
        receiver.calls,
        vec![
            "receive",
            "abandon lock-device-1/a.txt",
            "receive",
            "complete lock-device-1/b.txt",
            "receive",
        ]
    );
}

#[tokio::test]
async fn cancelled_listener_does_not_receive() {
    let receiver = ScriptedReceiver::new(vec![Delivery::Notification("device-1/a.txt")]);
    let mut listener = NotificationListener::new(receiver, RecordingHandler::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let completed = listener.run(cancel).await.unwrap();

    let (receiver, _) = listener.into_parts();
    assert_eq!(completed, 0);
    assert!(receiver.calls.is_empty());
}

#[tokio::test]
async fn receiver_error_ends_the_loop() {
    let receiver = ScriptedReceiver::new(vec![
        Delivery::Notification("device-1/a.txt"),
        Delivery::Error,
        Delivery::Notification("device-1/b.txt"),
    ]);
    let mut listener = NotificationListener::new(receiver, RecordingHandler::default());

    assert!(listener.run(CancellationToken::new()).await.is_err());

    let (receiver, _) = listener.into_parts();
    assert_eq!(
        receiver.calls,
        vec!["receive", "complete lock-device-1/a.txt", "receive"]
    );
}

#[tokio::test]
async fn closures_can_handle_notifications() {
    let receiver = ScriptedReceiver::new(vec![Delivery::Notification("device-1/a.txt")]);
    let mut seen = Vec::new();
    let handler = |notification: &FileUploadNotification| -> Result<(), HandlerError> {
        seen.push(notification.blob_name.clone());
        Ok(())
    };
    let mut listener = NotificationListener::new(receiver, handler);

    assert_eq!(listener.run(CancellationToken::new()).await.unwrap(), 1);
    drop(listener);
    assert_eq!(seen, vec!["device-1/a.txt"]);
}
