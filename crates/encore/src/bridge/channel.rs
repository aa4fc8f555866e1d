//! Channel-backed page
//!
//! Forwards snippets to whoever holds the receiving end, typically the
//! WebSocket session of the real hosted page.

use tokio::sync::mpsc;

use super::{PageError, PageHost};

/// Page collaborator that queues snippets on an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelPage {
    label: String,
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelPage {
    /// Create a page and the receiver its snippets arrive on
    pub fn new(label: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                label: label.into(),
                tx,
            },
            rx,
        )
    }
}

impl PageHost for ChannelPage {
    fn execute(&self, script: &str) -> Result<(), PageError> {
        self.tx
            .send(script.to_string())
            .map_err(|_| PageError::Disconnected)
    }

    fn describe(&self) -> String {
        format!("page {}", self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwards_until_receiver_drops() {
        let (page, mut rx) = ChannelPage::new("test");
        page.execute("one();").unwrap();
        assert_eq!(rx.try_recv().unwrap(), "one();");

        drop(rx);
        assert!(matches!(page.execute("two();"), Err(PageError::Disconnected)));
    }
}
