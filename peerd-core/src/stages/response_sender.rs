use crate::{PeerError, PooledTicket, Stage};
use async_trait::async_trait;

/// Delivers each ticket's result to its client. The ticket goes back to
/// the pool when `process` returns.
#[derive(Debug, Default)]
pub struct ResponseSender;

impl ResponseSender {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for ResponseSender {
    type Item = PooledTicket;

    async fn process(&self, mut ticket: PooledTicket) {
        ticket.mark();
        let result = ticket.take_result();

        let Some(channel) = ticket.channel().cloned() else {
            tracing::warn!("{} has no channel to answer on", ticket.command);
            return;
        };

        if let Err(error) = channel.send(&ticket.command, &result).await {
            match error {
                PeerError::Transport(_) => {
                    tracing::warn!("Failed to send {} response: {}", ticket.command, error)
                }
                _ => tracing::error!("Failed to encode {} response: {}", ticket.command, error),
            }
        }

        let millis = ticket.duration().as_secs_f64() * 1000.0;
        if let Some(message) = &ticket.message {
            let peer = channel
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| "-".to_string());
            tracing::info!("{} {} {:.1}ms", message, peer, millis);
        }
        tracing::debug!(
            "{} {} {}",
            ticket.command,
            ticket.timing_summary(),
            ticket.basket.map(|b| b.to_string()).unwrap_or_default()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestChannel;
    use crate::{Payload, TicketPool};

    #[tokio::test]
    async fn test_sends_result_and_returns_ticket() {
        let pool = TicketPool::new("Test ticket pool", "ttp", 2);
        let channel = TestChannel::tcp();

        let mut ticket = pool.create_ticket();
        ticket.attach(channel.clone(), "");
        ticket.command = "NOP".to_string();
        ticket.mark();
        ticket.set_result(Ok(Payload::new()));

        ResponseSender::new().process(ticket).await;

        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "NOP");
        assert!(sent[0].1.as_ref().unwrap().is_empty());
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn test_missing_result_is_internal_error() {
        let pool = TicketPool::new("Test ticket pool", "ttp", 2);
        let channel = TestChannel::udp();

        let mut ticket = pool.create_ticket();
        ticket.attach(channel.clone(), "");
        ticket.command = "CREATE".to_string();
        ResponseSender::new().process(ticket).await;

        assert_eq!(
            channel.sent(),
            vec![("CREATE".to_string(), Err("InternalServerError".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_transport_failure_still_returns_ticket() {
        let pool = TicketPool::new("Test ticket pool", "ttp", 2);
        let channel = TestChannel::tcp();
        channel.fail_sends();

        let mut ticket = pool.create_ticket();
        ticket.attach(channel.clone(), "");
        ticket.command = "DELETE".to_string();
        ticket.message = Some("DELETE: 1.1.1 /d/1.1.1".to_string());
        ticket.set_result(Err(PeerError::NotFound("/a/1.1.1".to_string())));
        ResponseSender::new().process(ticket).await;

        assert!(channel.sent().is_empty());
        assert_eq!(pool.in_use(), 0);
    }
}
