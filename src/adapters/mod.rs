pub mod http;
#[cfg(feature = "onnx")]
pub mod onnx;
#[cfg(feature = "onnx")]
pub mod render;
pub mod source;
#[cfg(feature = "v4l2")]
pub mod v4l2;
