//! CogniVerse Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the CogniVerse
//! client to run against both a **Production** backend (tokio + reqwest) and
//! a **Simulated** backend (virtual clock + in-memory transport).
//!
//! # Core Concept
//!
//! Every source of non-determinism in the client is intercepted:
//! - Time (`now()`, `sleep()`)
//! - Task scheduling (`spawn()`)
//! - Network (`HttpTransport::send()`)
//!
//! The polling loop and the API client are generic over these traits, so
//! their behavior under slow, flaky or expiring backends is reproducible.
//!
//! # Example
//!
//! ```ignore
//! use cogniverse_env::{ClientContext, HttpTransport};
//!
//! async fn poll_loop<Ctx: ClientContext, Net: HttpTransport>(ctx: &Ctx, net: &Net) {
//!     loop {
//!         let response = net.send(HttpRequest::get(url)).await;
//!         handle(response);
//!         ctx.sleep(Duration::from_secs(2)).await;
//!     }
//! }
//! ```

mod context;
mod http;
mod types;
mod error;
mod tokio_impl;

pub use context::ClientContext;
pub use http::{HttpTransport, ReqwestTransport};
pub use types::{HttpRequest, HttpResponse, Method};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
