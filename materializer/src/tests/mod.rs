pub mod fetchers;
