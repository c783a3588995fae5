//! Device memory sub-allocation and a single-owner job scheduler for Vulkan
//! applications built on ash.

pub mod graphics;
pub mod jobs;
pub mod logging;
