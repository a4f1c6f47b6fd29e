//! # tca-rs
//!
//! This crate grants tools like ffmpeg access to paid TwitCasting archive
//! streams by running a local proxy that re-signs every request with a
//! captured browser identity.
//!
//! Two halves cooperate through a shared [`session::Session`]:
//!
//! - the [`resolver`] walks a browser-automation driver (anything
//!   implementing [`driver::PageDriver`]) through sign-in and ticket
//!   selection, captures the signed playlist URL and harvests the
//!   identity cookies backing it;
//! - the [`proxy`] replays that identity on every request forwarded to
//!   the per-broadcast download host, streaming responses back untouched.
//!
//! ## Usage
//!
//! The following example serves the proxy on port 5000. The session can
//! be populated by running a [`resolver::Resolver`] against it, or by
//! hand through the form at `/config`.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tca_rs::{server, session::SessionStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(SessionStore::new());
//!     let session = store.get_or_create("5000");
//!     store.set_active(&session);
//!
//!     let state = server::AppState {
//!         store: store.clone(),
//!         http: reqwest::Client::new(),
//!         session_key: "5000".to_string(),
//!     };
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:5000")
//!         .await
//!         .expect("Could not bind");
//!     axum::serve(listener, server::router(state))
//!         .await
//!         .expect("Server exited with error");
//! }
//! ```
//!
//! Once a playlist is resolved, point ffmpeg at its path through the
//! proxy: `ffmpeg -i "http://localhost:5000/<path>/master.m3u8" -c copy
//! output.mkv`.

#[forbid(unsafe_code)]
#[macro_use]
extern crate log;

pub mod cookies;
pub mod download_session;
pub mod driver;
pub mod proxy;
pub mod resolver;
pub mod server;
pub mod session;
