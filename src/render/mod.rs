mod annotate;

pub use annotate::Annotator;
