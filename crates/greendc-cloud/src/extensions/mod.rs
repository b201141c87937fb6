pub mod dataset_reader;
pub mod planetlab_reader;
pub mod swf_reader;
