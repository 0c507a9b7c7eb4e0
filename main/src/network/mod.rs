pub mod interfaces;
pub mod socket;
pub mod udp_receiver;
