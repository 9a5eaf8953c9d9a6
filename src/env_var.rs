use std::sync::OnceLock;

use serde::Deserialize;

fn default_deadlock_timeout() -> f64 {
    600.0
}

fn default_backend() -> String {
    "local".to_owned()
}

fn default_num_pes() -> usize {
    1
}

#[derive(Deserialize, Debug)]
pub struct Config {
    /// A timeout in seconds after which a SYNC IMAGES still waiting on its partners prints a
    /// potential deadlock warning, default: 600.0 seconds. The wait itself is never abandoned.
    #[serde(default = "default_deadlock_timeout")]
    pub deadlock_timeout: f64,

    /// flag used to print the potential deadlock warning for SYNC IMAGES. Default: true
    pub sync_warning: Option<bool>,

    /// The lamellae backend to use
    /// local -- every image runs inside this process, default
    /// shmem -- multi process single node execution
    #[serde(default = "default_backend")]
    pub backend: String, //shmem,local

    /// Number of images in a shmem job, default: 1
    #[serde(default = "default_num_pes")]
    pub num_pes: usize,

    /// 0-based id of this image in a shmem job, default: 0
    #[serde(default)]
    pub pe_id: usize,

    /// Namespaces the shared memory segments of a shmem job, default: 0
    #[serde(default)]
    pub job_id: usize,

    /// Upper bound in bytes on the memory a single image may register, default: unbounded
    pub heap_size: Option<usize>,
}

/// Get the current Environment Variable configuration
pub fn config() -> &'static Config {
    static CONFIG: OnceLock<Config> = OnceLock::new();
    CONFIG.get_or_init(|| match envy::prefixed("LAMELLAR_").from_env::<Config>() {
        Ok(config) => config,
        Err(error) => panic!("{}", error),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_environment() {
        let config = envy::prefixed("LAMELLAR_CAF_TEST_UNSET_")
            .from_iter::<_, Config>(Vec::<(String, String)>::new())
            .unwrap();
        assert_eq!(config.deadlock_timeout, 600.0);
        assert_eq!(config.backend, "local");
        assert_eq!(config.num_pes, 1);
        assert_eq!(config.pe_id, 0);
        assert_eq!(config.job_id, 0);
        assert_eq!(config.heap_size, None);
        assert_eq!(config.sync_warning, None);
    }

    #[test]
    fn shmem_job_from_environment() {
        let vars = vec![
            ("LAMELLAR_BACKEND".to_owned(), "shmem".to_owned()),
            ("LAMELLAR_NUM_PES".to_owned(), "4".to_owned()),
            ("LAMELLAR_PE_ID".to_owned(), "3".to_owned()),
            ("LAMELLAR_HEAP_SIZE".to_owned(), "1048576".to_owned()),
            ("LAMELLAR_DEADLOCK_TIMEOUT".to_owned(), "2.5".to_owned()),
        ];
        let config = envy::prefixed("LAMELLAR_")
            .from_iter::<_, Config>(vars)
            .unwrap();
        assert_eq!(config.backend, "shmem");
        assert_eq!(config.num_pes, 4);
        assert_eq!(config.pe_id, 3);
        assert_eq!(config.heap_size, Some(1 << 20));
        assert_eq!(config.deadlock_timeout, 2.5);
    }
}
