pub mod preview_campaign;
pub mod send_campaign;
