pub mod channel;
pub mod negotiator;
pub mod peer;
pub mod progress;
pub mod protocol;
pub mod pump;
pub mod receiver;
pub mod sender;
pub mod sessions;
pub mod signaling;
