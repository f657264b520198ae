// Application layer - Use cases and the seams adapters plug into
pub mod channel_connector;
pub mod channel_messages;
pub mod event_hub;
pub mod live_channel;
pub mod template_directory;
pub mod template_repository;
pub mod tile_synchronizer;

#[cfg(test)]
pub(crate) mod test_support;
