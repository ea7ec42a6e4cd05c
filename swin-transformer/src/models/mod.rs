pub mod attention;
pub mod block;
pub mod layer;
pub mod mlp;
pub mod patch_embed;
pub mod patch_merging;
pub mod transformer;
pub mod window;
