pub mod balancer;
pub mod dispatch;
pub mod endpoint;
pub mod entity;
pub mod metrics;
pub mod reconciler;
pub mod routing;
pub mod watch;

pub use balancer::LocationBalancer;
pub use dispatch::{dispatch, DispatchError};
pub use endpoint::Endpoint;
pub use entity::{Change, Declared, Host, Location, Upstream};
pub use reconciler::{HostDuplicatePolicy, Reconciler, ReconcilerOptions};
pub use routing::RoutingTree;
pub use watch::{bootstrap, run, ConfigSource, StoreError};
