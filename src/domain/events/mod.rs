use serde::{Deserialize, Serialize};

/// Wire envelope carried on the dispatch queue. Only the id travels; the
/// worker re-reads everything else from the store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CampaignSendEvent {
    pub outbound_message_id: i64,
}

impl CampaignSendEvent {
    pub fn new(outbound_message_id: i64) -> Self {
        Self {
            outbound_message_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_single_id_field() {
        let payload = serde_json::to_string(&CampaignSendEvent::new(42)).unwrap();
        assert_eq!(payload, r#"{"outbound_message_id":42}"#);
    }

    #[test]
    fn rejects_payload_without_id() {
        assert!(serde_json::from_slice::<CampaignSendEvent>(br#"{"id":1}"#).is_err());
        assert!(serde_json::from_slice::<CampaignSendEvent>(b"invalid json {{{").is_err());
    }
}
