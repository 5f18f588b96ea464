pub mod chat;
pub mod directory;
pub mod engine;
pub mod events;
pub mod hosts;
pub mod model;
pub mod transfer;
pub mod tunnel;

pub use engine::Engine;
pub use events::EventBus;
pub use model::{
    ChatMessage, DaemonStatus, Event, EventKind, NetworkMembership, TransferSession,
    TransferStatus, TunnelConfig, TunnelPeer,
};
