//! Limb surgery: partitioning a trie at a fixed nibble depth into a trunk
//! and detached limbs, and reassembling it later.
//!
//! Unlike every other operation in this crate, surgery works on an owned
//! tree and mutates it along the way. Shared subtrees are copied on write
//! through [`Arc::make_mut`], so a snapshot cloned before surgery stays
//! valid; use [`Node::deep_copy`] when even buffer sharing must be avoided.
//! The trunks and limbs surgery leaves behind intentionally violate the
//! usual trie invariants (a trunk branch may have no children at all) until
//! the limbs are grafted back.
//!
//! When a branch loses a child, its canonical encoding is first snapshotted
//! into its `cache`, so a bare trunk still hashes and proves exactly like
//! the full trie it was cut from.

use std::sync::Arc;

use log::trace;
use thiserror::Error;

use crate::{
    nibbles::Nibbles,
    node::{Node, WrappedNode},
    trie_hashing::encode_node,
    trie_ops::merge_into_extension,
};

/// A detached subtree plus the fixed-depth key prefix it was cut from. The
/// prefix doubles as the lookup key when limbs are stored externally.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Limb {
    /// The nibble prefix this limb was anchored at.
    pub path: Nibbles,

    /// The subtree, with the prefix stripped from any leading path.
    pub node: Node,
}

/// Errors that can occur while grafting.
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum SurgeryError {
    /// The trunk did not resolve to a branch at the attachment point. The
    /// trunk/limb pairing produced by plucking never does this.
    #[error("Attempted to graft through a non-branch node (remaining path: 0x{0:x})")]
    InvalidGraft(Nibbles),
}

/// Alias for surgery operation results.
pub type SurgeryResult<T> = Result<T, SurgeryError>;

/// Partitions a trie at `depth` nibbles from the root into a trunk and the
/// list of limbs cut from it.
///
/// The trunk keeps all structure above the cut; every subtree at exactly
/// `depth` nibbles is removed and returned as a [`Limb`]. If the root's own
/// path already reaches the cut there is no trunk and the whole trie
/// becomes one limb. A `depth` of zero or an empty trie is a no-op.
pub fn pluck_limbs(trie: Node, depth: usize) -> (Node, Vec<Limb>) {
    if depth == 0 || trie.is_empty() {
        return (trie, Vec::new());
    }

    // A root whose own path reaches the cut is detached wholesale.
    match trie {
        Node::Leaf { nibbles, value } if nibbles.count >= depth => {
            let (prefix, rest) = nibbles.split_at_idx(depth);
            let limb = Limb {
                path: prefix,
                node: Node::Leaf {
                    nibbles: rest,
                    value,
                },
            };

            return (Node::Empty, vec![limb]);
        }
        Node::Extension { nibbles, child } if nibbles.count >= depth => {
            let (prefix, rest) = nibbles.split_at_idx(depth);
            let node = match rest.is_empty() {
                true => unwrap_node(child),
                false => Node::Extension {
                    nibbles: rest,
                    child,
                },
            };

            return (Node::Empty, vec![Limb { path: prefix, node }]);
        }
        Node::Leaf { .. } => return (trie, Vec::new()),
        _ => {}
    }

    let mut trunk = trie;
    let mut limbs = Vec::new();

    match &mut trunk {
        node @ Node::Branch { .. } => {
            pluck_from_branch(node, Nibbles::default(), depth, &mut limbs)
        }
        Node::Extension { nibbles, child } => {
            // The extension is shorter than the cut, so its child branch
            // still lies above it.
            let prefix = *nibbles;
            pluck_from_branch(Arc::make_mut(child), prefix, depth, &mut limbs);
        }
        _ => unreachable!("roots at or above the cut were already handled"),
    }

    trace!(
        "Plucked {} limb(s) at a depth of {} nibble(s)",
        limbs.len(),
        depth
    );

    (trunk, limbs)
}

/// What happens to one child slot of a branch during a pluck.
enum SlotAction {
    Keep,
    Detach,
    DescendBranch,
    DescendExtension,
}

fn pluck_from_branch(node: &mut Node, prefix: Nibbles, depth: usize, limbs: &mut Vec<Limb>) {
    // Nibbles left between a child slot of this branch and the cut.
    let rest = depth - prefix.count - 1;

    let actions: [SlotAction; 16] = {
        let Node::Branch { children, .. } = &*node else {
            unreachable!("pluck only descends into branches");
        };

        std::array::from_fn(|i| slot_action(&children[i], rest))
    };

    // Snapshot the intact branch's encoding before clearing anything, so
    // the trunk keeps hashing like the full trie.
    if actions.iter().any(|a| matches!(a, SlotAction::Detach)) {
        let snapshot = encode_node(node);
        let Node::Branch { cache, .. } = &mut *node else {
            unreachable!();
        };

        if cache.is_none() {
            *cache = Some(snapshot);
        }
    }

    let Node::Branch { children, .. } = &mut *node else {
        unreachable!();
    };

    for (i, action) in actions.into_iter().enumerate() {
        let slot_prefix = prefix.merge_nibble(i as u8);

        match action {
            SlotAction::Keep => {}
            SlotAction::Detach => {
                let detached =
                    unwrap_node(std::mem::replace(&mut children[i], Arc::new(Node::Empty)));
                limbs.push(detach_limb(detached, slot_prefix, rest));
            }
            SlotAction::DescendBranch => {
                pluck_from_branch(Arc::make_mut(&mut children[i]), slot_prefix, depth, limbs);
            }
            SlotAction::DescendExtension => {
                let Node::Extension { nibbles, .. } = &*children[i] else {
                    unreachable!();
                };
                let ext_prefix = slot_prefix.merge_nibbles(nibbles);

                let Node::Extension { child, .. } = Arc::make_mut(&mut children[i]) else {
                    unreachable!();
                };
                pluck_from_branch(Arc::make_mut(child), ext_prefix, depth, limbs);
            }
        }
    }
}

fn slot_action(child: &Node, rest: usize) -> SlotAction {
    match child {
        Node::Empty => SlotAction::Keep,
        _ if rest == 0 => SlotAction::Detach,
        Node::Branch { .. } => SlotAction::DescendBranch,
        // A leaf ending at or above the cut stays in the trunk.
        Node::Leaf { nibbles, .. } => match nibbles.count > rest {
            true => SlotAction::Detach,
            false => SlotAction::Keep,
        },
        // An extension reaching the cut is detached; a shorter one still
        // has its child branch above the cut.
        Node::Extension { nibbles, .. } => match nibbles.count >= rest {
            true => SlotAction::Detach,
            false => SlotAction::DescendExtension,
        },
    }
}

/// Builds the limb for a detached child whose slot sits `rest` nibbles
/// above the cut, stripping that many nibbles from its leading path.
fn detach_limb(detached: Node, slot_prefix: Nibbles, rest: usize) -> Limb {
    if rest == 0 {
        return Limb {
            path: slot_prefix,
            node: detached,
        };
    }

    match detached {
        Node::Leaf { nibbles, value } => {
            let (mid, tail) = nibbles.split_at_idx(rest);

            Limb {
                path: slot_prefix.merge_nibbles(&mid),
                node: Node::Leaf {
                    nibbles: tail,
                    value,
                },
            }
        }
        Node::Extension { nibbles, child } if nibbles.count == rest => Limb {
            // The extension's child branch sits exactly at the cut.
            path: slot_prefix.merge_nibbles(&nibbles),
            node: unwrap_node(child),
        },
        Node::Extension { nibbles, child } => {
            let (mid, tail) = nibbles.split_at_idx(rest);

            Limb {
                path: slot_prefix.merge_nibbles(&mid),
                node: Node::Extension {
                    nibbles: tail,
                    child,
                },
            }
        }
        _ => unreachable!("only path-bearing nodes are detached above the cut"),
    }
}

/// Reattaches `limb` at `path` into `trunk`, undoing a pluck.
///
/// The descent follows existing trunk structure as far as it goes; when it
/// stops short (a "dropped extension" the trunk held no stub for), the
/// unconsumed path remainder is synthesized back around the limb. An empty
/// `path` is malformed by the pairing contract and returns the limb
/// unchanged. Branch caches along the way are left untouched: once every
/// limb is back, they are valid again.
pub fn graft_limb(trunk: Node, path: Nibbles, limb: Node) -> SurgeryResult<Node> {
    if path.is_empty() {
        return Ok(limb);
    }

    if trunk.is_empty() {
        return Ok(merge_into_extension(path, limb));
    }

    let mut trunk = trunk;
    graft_rec(&mut trunk, path, limb)?;

    Ok(trunk)
}

fn graft_rec(node: &mut Node, mut path: Nibbles, limb: Node) -> SurgeryResult<()> {
    match node {
        Node::Branch { children, .. } => {
            let nib = path.pop_next_nibble_front() as usize;

            if path.is_empty() {
                // Landed exactly on the slot.
                children[nib] = Arc::new(limb);
                return Ok(());
            }

            if children[nib].is_empty() {
                // Dropped extension: re-synthesize the remainder.
                children[nib] = Arc::new(merge_into_extension(path, limb));
                return Ok(());
            }

            graft_rec(Arc::make_mut(&mut children[nib]), path, limb)
        }
        Node::Extension { nibbles, child } => {
            if path.count <= nibbles.count
                || !path.nibbles_are_identical_up_to_smallest_count(nibbles)
            {
                return Err(SurgeryError::InvalidGraft(path));
            }

            path.truncate_n_nibbles_front_mut(nibbles.count);
            graft_rec(Arc::make_mut(child), path, limb)
        }
        Node::Empty | Node::Leaf { .. } => Err(SurgeryError::InvalidGraft(path)),
    }
}

fn unwrap_node(node: WrappedNode) -> Node {
    Arc::try_unwrap(node).unwrap_or_else(|arc| (*arc).clone())
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::Arc;

    use super::{graft_limb, pluck_limbs, Limb, SurgeryError, SurgeryResult};
    use crate::{
        nibbles::Nibbles,
        node::{empty_branch_children, Node},
        testing_utils::{common_setup, generate_n_random_trie_entries},
        trie_ops::TrieOpResult,
    };

    fn nibbles(s: &str) -> Nibbles {
        Nibbles::from_str(s).unwrap()
    }

    fn leaf(path: &str, value: Vec<u8>) -> Node {
        Node::Leaf {
            nibbles: nibbles(path),
            value,
        }
    }

    fn empty_path_leaf(value: Vec<u8>) -> Node {
        Node::Leaf {
            nibbles: Nibbles::default(),
            value,
        }
    }

    fn reassemble(trunk: Node, limbs: Vec<Limb>) -> SurgeryResult<Node> {
        limbs
            .into_iter()
            .try_fold(trunk, |t, l| graft_limb(t, l.path, l.node))
    }

    #[test]
    fn pluck_of_empty_trie_is_a_noop() {
        common_setup();

        let (trunk, limbs) = pluck_limbs(Node::Empty, 1);
        assert!(trunk.is_empty());
        assert!(limbs.is_empty());
    }

    #[test]
    fn pluck_at_depth_zero_is_a_noop() {
        common_setup();

        let t = leaf("0x12", vec![0x03]);
        let (trunk, limbs) = pluck_limbs(t.clone(), 0);

        assert_eq!(trunk, t);
        assert!(limbs.is_empty());
    }

    #[test]
    fn pluck_root_leaf_crossing_the_cut() {
        common_setup();

        let (trunk, limbs) = pluck_limbs(leaf("0x12", vec![0x03, 0x04]), 1);

        assert!(trunk.is_empty());
        assert_eq!(
            limbs,
            vec![Limb {
                path: Nibbles::from_nibble(1),
                node: leaf("0x2", vec![0x03, 0x04]),
            }]
        );
    }

    #[test]
    fn pluck_root_leaf_ending_at_the_cut() {
        common_setup();

        let (trunk, limbs) = pluck_limbs(leaf("0x00", vec![0x01]), 2);

        assert!(trunk.is_empty());
        assert_eq!(
            limbs,
            vec![Limb {
                path: nibbles("0x00"),
                node: empty_path_leaf(vec![0x01]),
            }]
        );
    }

    #[test]
    fn pluck_root_leaf_above_the_cut_is_a_noop() {
        common_setup();

        let t = leaf("0x00", vec![0x01]);
        let (trunk, limbs) = pluck_limbs(t.clone(), 3);

        assert_eq!(trunk, t);
        assert!(limbs.is_empty());
    }

    #[test]
    fn pluck_root_extension_crossing_the_cut() -> TrieOpResult<()> {
        common_setup();

        // An extension over a branch of two empty-path leaves.
        let mut t = Node::default();
        t.insert(nibbles("0x00"), vec![0x01])?;
        t.insert(nibbles("0x01"), vec![0x02])?;

        // The same two entries keyed one nibble shorter form the expected
        // limb below the cut.
        let mut expected_limb = Node::default();
        expected_limb.insert(Nibbles::from_nibble(0), vec![0x01])?;
        expected_limb.insert(Nibbles::from_nibble(1), vec![0x02])?;

        let (trunk, limbs) = pluck_limbs(t, 1);
        assert!(trunk.is_empty());
        assert_eq!(
            limbs,
            vec![Limb {
                path: Nibbles::from_nibble(0),
                node: expected_limb,
            }]
        );

        Ok(())
    }

    #[test]
    fn pluck_cuts_directly_below_a_root_extension() -> TrieOpResult<()> {
        common_setup();

        let mut t = Node::default();
        t.insert(nibbles("0x00"), vec![0x01])?;
        t.insert(nibbles("0x01"), vec![0x02])?;

        let (trunk, limbs) = pluck_limbs(t, 2);

        // The trunk keeps the extension over a now-childless branch.
        match &trunk {
            Node::Extension { nibbles: n, child } => {
                assert_eq!(*n, Nibbles::from_nibble(0));
                match &**child {
                    Node::Branch { children, cache } => {
                        assert!(children.iter().all(|c| c.is_empty()));
                        assert!(cache.is_some());
                    }
                    _ => panic!("expected a branch below the trunk extension"),
                }
            }
            _ => panic!("expected a trunk extension"),
        }

        assert_eq!(
            limbs,
            vec![
                Limb {
                    path: nibbles("0x00"),
                    node: empty_path_leaf(vec![0x01]),
                },
                Limb {
                    path: nibbles("0x01"),
                    node: empty_path_leaf(vec![0x02]),
                },
            ]
        );

        Ok(())
    }

    #[test]
    fn pluck_leaves_shallow_structure_alone() -> TrieOpResult<()> {
        common_setup();

        let mut t = Node::default();
        t.insert(nibbles("0x00"), vec![0x01])?;
        t.insert(nibbles("0x01"), vec![0x02])?;

        let (trunk, limbs) = pluck_limbs(t.clone(), 3);
        assert_eq!(trunk, t);
        assert!(limbs.is_empty());

        Ok(())
    }

    #[test]
    fn pluck_detaches_an_extension_ending_at_the_cut() -> TrieOpResult<()> {
        common_setup();

        // Root branch; slot 0 holds an extension whose child branch sits
        // exactly at the cut depth.
        let mut t = Node::default();
        t.insert(nibbles("0x000"), vec![0x01])?;
        t.insert(nibbles("0x001"), vec![0x02])?;
        t.insert(nibbles("0x111"), vec![0x03])?;
        let h = t.hash();

        let (trunk, limbs) = pluck_limbs(t.clone(), 2);

        // The 0x11 leaf crosses the cut too and is detached alongside.
        assert_eq!(limbs.len(), 2);
        assert_eq!(limbs[0].path, nibbles("0x00"));
        assert!(matches!(limbs[0].node, Node::Branch { .. }));
        assert_eq!(limbs[1].path, nibbles("0x11"));

        // The trunk still hashes like the full trie through its cache, and
        // grafting the limb back restores the original structure.
        assert_eq!(trunk.hash(), h);

        let reassembled = reassemble(trunk, limbs).unwrap();
        assert_eq!(reassembled, t);
        assert_eq!(reassembled.hash(), h);

        Ok(())
    }

    #[test]
    fn trunk_hashes_and_proves_like_the_full_trie() -> TrieOpResult<()> {
        common_setup();

        let mut t = Node::default();
        t.insert(nibbles("0x00"), vec![0x01])?;
        t.insert(nibbles("0x01"), vec![0x02])?;
        t.insert(nibbles("0x10"), vec![0x03])?;
        t.insert(nibbles("0x11"), vec![0x04])?;

        let root_hash = t.hash();
        let proof = t.get_proof(nibbles("0x00"));

        let (trunk, limbs) = pluck_limbs(t, 1);
        assert_eq!(limbs.len(), 2);
        assert_eq!(limbs[0].path, Nibbles::from_nibble(0));

        assert_eq!(trunk.hash(), root_hash);

        // Partially reassembled, the proof for a restored key matches the
        // original exactly.
        let partial = graft_limb(trunk, limbs[0].path, limbs[0].node.clone()).unwrap();
        assert_eq!(partial.get_proof(nibbles("0x00")), proof);

        Ok(())
    }

    #[test]
    fn multi_nibble_extension_graft_installs_at_the_right_slot() -> TrieOpResult<()> {
        common_setup();

        // Trunk: a two-nibble extension over a branch; limbs hang directly
        // off the branch slots.
        let mut t = Node::default();
        t.insert(nibbles("0x000"), vec![0x01])?;
        t.insert(nibbles("0x001"), vec![0x02])?;
        let h = t.hash();

        let (trunk, limbs) = pluck_limbs(t.clone(), 3);
        assert_eq!(limbs.len(), 2);

        let reassembled = reassemble(trunk, limbs).unwrap();
        assert_eq!(reassembled, t);
        assert_eq!(reassembled.hash(), h);

        Ok(())
    }

    #[test]
    fn reconstruction_round_trips_at_every_depth() -> TrieOpResult<()> {
        common_setup();

        for depth in 1..=8 {
            for seed in 0..5 {
                let entries: Vec<_> = generate_n_random_trie_entries(10, seed).collect();

                let mut t = Node::default();
                for (k, v) in entries.iter() {
                    t.insert(Nibbles::from_h256_be(*k), v.clone())?;
                }
                let h = t.hash();

                // The clone keeps the original valid: surgery copies shared
                // nodes on write.
                let (trunk, limbs) = pluck_limbs(t.clone(), depth);
                let reassembled = reassemble(trunk, limbs).unwrap();

                assert_eq!(t.hash(), h);
                assert_eq!(reassembled, t);
                assert_eq!(reassembled.hash(), h);

                for (k, _) in entries.iter() {
                    let key = Nibbles::from_h256_be(*k);
                    assert_eq!(reassembled.get_proof(key), t.get_proof(key));
                }
            }
        }

        Ok(())
    }

    #[test]
    fn graft_with_empty_path_returns_the_limb() {
        common_setup();

        let limb = leaf("0x12", vec![0x01]);
        let trunk = leaf("0x34", vec![0x02]);

        assert_eq!(
            graft_limb(trunk, Nibbles::default(), limb.clone()),
            Ok(limb)
        );
    }

    #[test]
    fn graft_onto_an_absent_trunk_synthesizes_the_path() {
        common_setup();

        // A leaf limb absorbs the path into its own.
        let grafted = graft_limb(Node::Empty, nibbles("0x12"), leaf("0x3", vec![0x01])).unwrap();
        assert_eq!(grafted, leaf("0x123", vec![0x01]));

        // A branch limb gets wrapped in a fresh extension.
        let branch = Node::Branch {
            children: empty_branch_children(),
            cache: None,
        };
        let grafted = graft_limb(Node::Empty, nibbles("0x12"), branch.clone()).unwrap();
        assert_eq!(
            grafted,
            Node::Extension {
                nibbles: nibbles("0x12"),
                child: Arc::new(branch),
            }
        );
    }

    #[test]
    fn graft_through_a_leaf_is_invalid() {
        common_setup();

        let trunk = leaf("0x12", vec![0x01]);
        let res = graft_limb(trunk, nibbles("0x123"), empty_path_leaf(vec![0x02]));

        assert!(matches!(res, Err(SurgeryError::InvalidGraft(_))));
    }
}
