use ethereum_types::H256;
use rand::{rngs::StdRng, Rng, SeedableRng};

pub(crate) fn common_setup() {
    // Try init since multiple tests calling `init` will cause an error.
    let _ = pretty_env_logger::try_init();
}

/// Generates `n` random full-length key/value entries. Values carry no
/// leading zero byte, since inserts only accept trimmed payloads.
pub(crate) fn generate_n_random_trie_entries(
    n: usize,
    seed: u64,
) -> impl Iterator<Item = (H256, Vec<u8>)> {
    let mut rng = StdRng::seed_from_u64(seed);

    (0..n).map(move |_| (gen_key(&mut rng), gen_trimmed_value(&mut rng)))
}

fn gen_key(rng: &mut StdRng) -> H256 {
    H256(rng.gen())
}

fn gen_trimmed_value(rng: &mut StdRng) -> Vec<u8> {
    let len = rng.gen_range(1..=32);

    let mut v = vec![0; len];
    rng.fill(v.as_mut_slice());
    v[0] = rng.gen_range(1..=u8::MAX);

    v
}
