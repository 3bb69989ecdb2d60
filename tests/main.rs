mod buffer;
mod calibration;
mod common;
mod e2e;
mod selection;
