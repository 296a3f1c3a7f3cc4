//! Generated OpenGL bindings; see build.rs.

#![allow(
    clippy::all,
    non_upper_case_globals,
    non_snake_case,
    non_camel_case_types,
    unused
)]

include!(concat!(env!("OUT_DIR"), "/bindings.rs"));
