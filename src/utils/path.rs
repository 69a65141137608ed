use lazy_static::lazy_static;
use std::env;
use std::path::PathBuf;

const BASE_DIR: &str = "data";
const CONFIG_FILE_NAME: &str = "locale.yml";
const STORE_FILE_NAME: &str = "local_storage.json";

lazy_static! {
    static ref CWD: PathBuf = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
}

pub fn get_log_dir() -> PathBuf {
    PathBuf::from(BASE_DIR).join("logs")
}

fn get_base_dir() -> PathBuf {
    CWD.join(BASE_DIR)
}

pub fn get_cwd() -> PathBuf {
    CWD.clone()
}

pub fn get_config_dir() -> PathBuf {
    get_base_dir().join("config")
}

pub fn get_config_path() -> PathBuf {
    get_config_dir().join(CONFIG_FILE_NAME)
}

pub fn get_store_path() -> PathBuf {
    get_base_dir().join("store").join(STORE_FILE_NAME)
}
