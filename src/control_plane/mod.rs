pub mod cors;
pub mod http;
pub mod ipc_token;
pub mod rpc;

pub use ipc_token::IpcToken;

/// Generated tonic/prost bindings for the four RPC services (spec §4.3),
/// compiled from `proto/goconnect.proto` by `build.rs`.
pub mod pb {
    tonic::include_proto!("goconnect");
}
