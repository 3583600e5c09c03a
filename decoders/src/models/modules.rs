mod activation;
mod conv_norm_act;
mod norm;
mod regularizer;

pub use activation::*;
pub use conv_norm_act::*;
pub use norm::*;
pub use regularizer::*;
