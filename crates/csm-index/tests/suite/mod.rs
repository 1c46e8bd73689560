mod file_content;
mod per_file_components;
mod reference_store;
mod signature;
