//! Domain layer modules
//!
//! This module contains business domain logic:
//! - `event`: Upstream domain events and their decoding
//! - `notification`: Channel and priority vocabulary
//! - `routing`: Template/channel resolution and request composition
//! - `template`: Versioned notification template catalog

pub mod event;
pub mod notification;
pub mod routing;
pub mod template;
