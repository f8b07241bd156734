//! Console wireframe viewer for scalar fields `z = f(x, y)` and the gradient descent path
//! an optimizer takes across them.
//!
//! The pipeline is [`engine::RenderEngine`]: a surface grid sampled by [`mesh`], seen through
//! the view transform produced by [`camera::CameraController`], clipped, projected and
//! rasterized as depth-tested lines into a square ARGB framebuffer.

pub mod camera;
pub mod config;
pub mod engine;
pub mod field;
pub mod graphics;
pub mod math;
pub mod mesh;
pub mod state;
pub mod vertex;
pub mod widget;
