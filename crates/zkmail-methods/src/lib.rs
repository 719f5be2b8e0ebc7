//! `ZKMAIL_GUEST_ELF` and `ZKMAIL_GUEST_ID`, generated by risc0-build

include!(concat!(env!("OUT_DIR"), "/methods.rs"));
