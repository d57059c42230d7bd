mod builder;
mod helpers;
mod properties;
