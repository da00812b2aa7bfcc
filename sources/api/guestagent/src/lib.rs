/*!
# Guest configuration

The part of the agent that runs next to a datastore and owns its configuration file.

* [`overrides`] keeps the file as a base plus ordered layers of overrides, and regenerates it
  whenever a layer changes.
* [`codec`] reads and writes the datastore's file format.
* [`restart`] decides whether a set of overrides can be applied live.
* [`applier`] pushes dynamic parameters into the running datastore.
* [`service`] restarts the datastore when they can't.
* [`redis_app`] ties these together for Redis.

The `guest-overrides` binary applies a set of overrides read as JSON from stdin.
*/

pub mod applier;
pub mod codec;
pub mod config;
pub mod directive;
pub mod error;
pub mod overrides;
pub mod redis_app;
pub mod restart;
pub mod service;

pub use applier::{LiveApplier, RuntimeAdmin, ValueEncoder, WhitespaceJoin};
pub use codec::{CodecKind, IniCodec, PropertiesCodec, StreamCodec};
pub use config::GuestConfig;
pub use directive::{Directive, Overrides, ValueConverter};
pub use error::{Error, Result};
pub use overrides::{ConfigurationManager, Layer, LayerKind};
pub use redis_app::{RedisAdmin, RedisApp, RedisPaths};
