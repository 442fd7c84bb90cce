//! TimeGenie library
//!
//! Reminder scheduling engine: a durable reminder store, an in-process
//! timer set rebuilt from it on every start, a delivery dispatcher, and a
//! conversational intake that collects a time and a message.

pub mod app;
pub mod commands;
pub mod config;
pub mod database;
pub mod error;
pub mod messenger;
pub mod services;
pub mod time;
