//! civis wizard: the guided selection flow that turns catalog browsing into
//! a confirmed [`civis_core::ResourceBinding`].
//!
//! [`state::transition`] is pure; [`Wizard`] drives it and performs the
//! fetches it asks for.

#![forbid(unsafe_code)]

mod driver;
pub mod form;
pub mod i18n;
pub mod state;

pub use driver::{Outcome, Wizard};
pub use form::{clean_resource_name, render, Choice, Form};
pub use i18n::Translations;
pub use state::{transition, Discovery, Effect, Event, Need, SelectedResource, Step, UserInput, WizardPolicy, WizardState};
