pub mod http_sms;
pub mod jetstream;
pub mod simulated;
