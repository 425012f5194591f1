// Component A: gripper telemetry
// samples the gripper through the device facade, publishes latest-wins snapshots,
// serializes them and streams them to one TCP client; announces presence over UDP.

pub mod device;
pub mod state_cell;
pub mod sampler;
pub mod serializer;
pub mod stream_server;
pub mod heartbeat;
