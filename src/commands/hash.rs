/// `cpack hash` command implementation
///
/// Hashes files through the model hash cache; repeated calls on unchanged
/// files are answered from the cache.
use anyhow::Result;

use crate::cli::HashArgs;
use crate::cli_utils::{cpack_prefix, fail_mark};
use crate::config::CpackConfig;
use crate::hashing::ModelHashCache;
use crate::merger::MergedCacheConfig;

pub fn run(args: &HashArgs, config: Option<&CpackConfig>) -> Result<()> {
    let merged = MergedCacheConfig::merge(&args.common, config);
    let mut cache = ModelHashCache::load(&merged.hash_file);

    let results = cache.hash_many(&args.files)?;
    let mut failed = 0;
    for (file, result) in args.files.iter().zip(results) {
        match result {
            Some(sha256) => println!("{}  {}", sha256, file.display()),
            None => {
                failed += 1;
                eprintln!(
                    "{} {} Cannot hash {}",
                    cpack_prefix(),
                    fail_mark(),
                    file.display()
                );
            }
        }
    }

    let stats = cache.stats();
    eprintln!(
        "{} {} cached, {} hashed ({} bytes read)",
        cpack_prefix(),
        stats.hits,
        stats.misses,
        stats.bytes_hashed
    );

    if failed > 0 {
        anyhow::bail!("{} file(s) could not be hashed", failed);
    }
    Ok(())
}
