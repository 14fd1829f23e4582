//! Client-facing channels.

pub mod web;
