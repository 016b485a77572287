//! Crisp FOTA - firmware-over-the-air distribution for Crisp game devices
//!
//! Devices ask `GET /check` whether a newer build is active and fetch it from
//! `GET /download`; operators publish builds with `POST /upload`.

pub mod engine;
