pub mod campaign;
pub mod customer;
pub mod message;

pub use campaign::{Campaign, CampaignStatus};
pub use customer::CustomerProfile;
pub use message::{
    DeliveryStatus, OutboundMessage, OutboundMessageDetails, OutboundMessageUpdate,
};
