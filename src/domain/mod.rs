// Domain layer - Plain data shared by every other layer
pub mod live_update;
pub mod template;
pub mod tile;
pub mod timestamp;
pub mod widget;
