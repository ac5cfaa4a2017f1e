#![allow(dead_code)]

pub(crate) mod harness;

pub(crate) mod keys;

pub(crate) mod logging;

pub(crate) mod mem_db;

pub(crate) mod network;

pub(crate) mod node;
