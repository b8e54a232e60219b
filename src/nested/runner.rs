//! Nested engine entry point (`fabricsim nested`).
//!
//! Runs inside a physical node with the node's OVS environment. It builds the
//! descriptor's network, signals readiness through the ready file, then holds
//! the network until its stdin reaches end of file.

use super::descriptor::{NestedDescriptor, NESTED_SWITCH};
use super::manager::NestedError;
use crate::controller::{configure_forwarding, ControllerSpec};
use crate::engine::{materialize, Emulator};
use log::{info, warn};
use std::fs;
use std::io::{self, Read};

pub fn run_nested<E, R>(
    emulator: &mut E,
    descriptor: &NestedDescriptor,
    controller: &ControllerSpec,
    mut hold: R,
) -> Result<(), NestedError>
where
    E: Emulator + ?Sized,
    R: Read,
{
    let result = bring_up(emulator, descriptor, controller);
    if result.is_ok() {
        info!(
            "{}: nested network up with {} endpoints",
            descriptor.node,
            descriptor.hosts().count()
        );
        if let Err(e) = io::copy(&mut hold, &mut io::sink()) {
            warn!("{}: lost the control channel: {}", descriptor.node, e);
        }
        info!("{}: stopping nested network", descriptor.node);
    }
    if let Err(e) = emulator.stop() {
        warn!("{}: nested teardown incomplete: {}", descriptor.node, e);
    }
    result
}

fn bring_up<E: Emulator + ?Sized>(
    emulator: &mut E,
    descriptor: &NestedDescriptor,
    controller: &ControllerSpec,
) -> Result<(), NestedError> {
    materialize(emulator, descriptor.declarations())?;
    configure_forwarding(emulator, NESTED_SWITCH, controller)?;
    fs::write(&descriptor.ready_file, b"").map_err(|source| NestedError::Descriptor {
        node: descriptor.node.clone(),
        path: descriptor.ready_file.clone(),
        source,
    })
}
