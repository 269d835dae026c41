//! Interrupt driven DMX512 (ANSI E1.11) and DMX-RDM (ANSI E1.20) port driver for a uart with a
//! hardware timer. This library features no-std as well as no-alloc support (no heap allocation)
//! to target embedded as well as os platforms.
//!
//! Please refer to the [official specifications](https://tsp.esta.org/) published by the ESTA.
//!
//! The crate is split into layers:
//! - [dmx_uart_driver] describes the hardware: a uart with rs485 direction control, a timer with an
//!   alarm and a way for blocked tasks to wait.
//! - [timing] and [bus] generate and measure break and mark after break and run the receive and
//!   transmit state machine from the interrupt handlers.
//! - [port] owns the hardware of one port, [dmx_transaction] gives tasks exclusive access to it
//!   and implements request/response transactions with bus turnaround.
//! - [dmx_controller] and [rdm_discovery] build RDM controllers on top of a transaction,
//!   [dmx_receiver] and [rdm_responder] build RDM responders backed by the parameter dictionary
//!   of [rdm_parameters] and the typed parameter codec of [rdm_codec].
//!
//! # Usage
//!
//! The interrupt handlers of the target forward to the port:
//!
//! ```rust,ignore
//! static PORT: StaticCell<DmxPort<Uart1, Timer0>> = StaticCell::new();
//!
//! #[interrupt]
//! fn UART1() {
//!     PORT.get().on_uart_interrupt();
//! }
//!
//! #[interrupt]
//! fn TIMER0() {
//!     PORT.get().on_timer_interrupt();
//! }
//! ```
//!
//! ## Controller
//!
//! ```rust,ignore
//! use dmx_rdm_port::dmx_controller::{DmxController, DmxControllerConfig};
//! use dmx_rdm_port::dmx_uart_driver::SpinWait;
//! use dmx_rdm_port::port::{DmxConfig, DmxPort};
//! use dmx_rdm_port::rdm_discovery::{run_full_discovery, DiscoveryConfig};
//! use dmx_rdm_port::unique_identifier::PackageAddress;
//!
//! let port = DmxPort::install(uart, timer, DmxConfig::default()).unwrap();
//! port.enable().unwrap();
//!
//! let mut wait = SpinWait;
//! let mut dmx_controller = DmxController::new(port.lock(&mut wait), &DmxControllerConfig::default());
//!
//! let mut devices_found = heapless::Vec::<_, 64>::new();
//! run_full_discovery(&mut dmx_controller, &DiscoveryConfig::default(), |uid| {
//!     let _ = devices_found.push(uid);
//! })
//! .unwrap();
//!
//! for device in devices_found {
//!     dmx_controller
//!         .rdm_set_identify(PackageAddress::Device(device), true)
//!         .unwrap();
//! }
//! ```
//!
//! ## Responder
//!
//! ```rust,ignore
//! use dmx_rdm_port::bus::PortMode;
//! use dmx_rdm_port::dmx_receiver::{DmxFrame, DmxResponderHandler, RdmResponder};
//! use dmx_rdm_port::dmx_uart_driver::SpinWait;
//! use dmx_rdm_port::port::{DmxConfig, DmxPort};
//! use dmx_rdm_port::rdm_responder::{DmxReceiverContext, RdmResponderConfig};
//! use dmx_rdm_port::unique_identifier::UniqueIdentifier;
//!
//! struct Fixture;
//!
//! impl DmxResponderHandler for Fixture {
//!     type Error = core::convert::Infallible;
//!
//!     fn handle_dmx(
//!         &mut self,
//!         dmx_frame: DmxFrame,
//!         context: &mut DmxReceiverContext,
//!     ) -> Result<(), Self::Error> {
//!         // output the slots starting at the current dmx start address
//!         Ok(())
//!     }
//! }
//!
//! let port = DmxPort::install(
//!     uart,
//!     timer,
//!     DmxConfig {
//!         mode: PortMode::Responder,
//!         ..Default::default()
//!     },
//! )
//! .unwrap();
//! port.enable().unwrap();
//!
//! // backing storage of the parameter dictionary
//! let mut arena = [0u8; 128];
//! let mut wait = SpinWait;
//! let mut dmx_responder = RdmResponder::new(
//!     port.lock(&mut wait),
//!     RdmResponderConfig {
//!         uid: UniqueIdentifier::new(0x7FF0, 1).unwrap(),
//!         supported_pids: &[],
//!         rdm_receiver_metadata: Default::default(),
//!     },
//!     &mut arena,
//! )
//! .unwrap();
//!
//! loop {
//!     if let Err(error) = dmx_responder.poll(&mut Fixture) {
//!         println!("'{error}' during polling");
//!     }
//! }
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// must stay first, the logging macros are used by every other module
#[macro_use]
mod fmt;

pub mod bus;
pub mod command_class;
pub mod consts;
/// Module for building dmx-rdm controllers.
pub mod dmx_controller;
/// Driver traits the controller and the responder are built on.
pub mod dmx_driver;
/// Module for building dmx-rdm receivers.
pub mod dmx_receiver;
pub mod dmx_transaction;
/// Hardware abstraction for the uart, the timer and blocking waits.
pub mod dmx_uart_driver;
mod layouts;
pub mod pids;
pub mod port;
pub mod rdm_codec;
pub mod rdm_data;
/// Binary tree search for rdm responders.
pub mod rdm_discovery;
pub mod rdm_parameters;
/// Parser for handling rdm requests without an underlying driver.
/// Mainly for highly interrupt driven applications.
pub mod rdm_responder;
pub mod rdm_types;
pub mod timing;
pub mod types;
pub mod unique_identifier;
pub mod utils;

#[cfg(test)]
mod sim;
