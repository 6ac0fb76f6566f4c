mod store_adapter;

pub use store_adapter::StoreAdapter;
