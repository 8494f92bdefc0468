use std::path::Path;

use log::info;

use crate::bits::BitVector;
use crate::error::Result;
use crate::stream::{KeyStream, KeyStreamWriter};
use crate::transform::TransformationStrategy;
use crate::trie::{Behaviour, IntermediateTrie};

/// The spilled behaviour streams: internal-node pairs carry two-bit values,
/// leaf pairs one-bit values.
pub(crate) struct BehaviourStreams {
    pub internal: KeyStream,
    pub external: KeyStream,
}

/// Stream the keys a second time, walking the trie and spilling one record
/// per fresh (node, path) pair.
///
/// Consecutive keys share long prefixes, so a stack of (node, key position)
/// frames from the previous walk is kept and rewound to the common prefix,
/// which makes the whole pass amortised linear. The last emitted pair is
/// remembered across keys: adjacent keys that exit the same node with the
/// same path would otherwise spill the same record twice, and the static
/// function builder requires distinct keys.
pub(crate) fn label_behaviours<T, S: TransformationStrategy<T>>(
    trie: &mut IntermediateTrie,
    elements: &[T],
    strategy: &S,
    temp_dir: Option<&Path>,
) -> Result<BehaviourStreams> {
    let mut internal = KeyStreamWriter::create(temp_dir)?;
    let mut external = KeyStreamWriter::create(temp_dir)?;

    let root = match trie.root {
        Some(root) => root,
        None => {
            return Ok(BehaviourStreams {
                internal: internal.finish()?,
                external: external.finish()?,
            })
        }
    };

    info!("computing behaviour keys");

    // Frames of the previous key's walk: node and the bit position where its
    // compacted path starts in the key.
    let mut stack: Vec<u32> = vec![root];
    let mut starts: Vec<usize> = vec![0];
    let mut depth = 0usize;
    let mut first = true;
    let mut prev = BitVector::new();
    let mut last: Option<(u32, BitVector)> = None;

    for element in elements {
        let curr = strategy.to_bit_vector(element);
        if first {
            first = false;
        } else {
            let prefix = prev.longest_common_prefix(&curr);
            while depth > 0 && starts[depth] > prefix {
                depth -= 1;
            }
        }
        let mut node = stack[depth];
        let mut pos = starts[depth];

        loop {
            let node_path_len = trie.nodes[node as usize].path.len();
            let prefix = curr.lcp_from(pos, &trie.nodes[node as usize].path);
            let is_leaf = trie.nodes[node as usize].is_leaf();

            if prefix < node_path_len || !trie.nodes[node as usize].emitted {
                let (behaviour, path) = if prefix == node_path_len {
                    // Follow-through; leaves can only be matched exactly
                    trie.nodes[node as usize].emitted = true;
                    debug_assert!(!is_leaf || curr.len() - pos == node_path_len);
                    let behaviour = if is_leaf {
                        Behaviour::Left
                    } else {
                        Behaviour::Follow
                    };
                    (behaviour, trie.nodes[node as usize].path.clone())
                } else {
                    // Exit; the divergence bit decides the side
                    let behaviour = if trie.nodes[node as usize].path.get(prefix) {
                        Behaviour::Left
                    } else {
                        Behaviour::Right
                    };
                    let path = if is_leaf {
                        curr.sub_vector(pos, curr.len())
                    } else {
                        curr.sub_vector(pos, pos + (curr.len() - pos).min(node_path_len))
                    };
                    (behaviour, path)
                };

                let pair = (node, path);
                if last.as_ref() != Some(&pair) {
                    let bfs_index = trie.nodes[node as usize].index as u64;
                    if is_leaf {
                        external.push(bfs_index, &pair.1, behaviour as u8)?;
                    } else {
                        internal.push(bfs_index, &pair.1, behaviour as u8)?;
                    }
                    last = Some(pair);
                }

                if behaviour != Behaviour::Follow {
                    break;
                }
            }

            pos += node_path_len + 1;
            if pos > curr.len() {
                break;
            }
            let next = if curr.get(pos - 1) {
                trie.nodes[node as usize].right
            } else {
                trie.nodes[node as usize].left
            };
            node = next.expect("descended past a leaf");
            depth += 1;
            if depth == stack.len() {
                stack.push(node);
                starts.push(pos);
            } else {
                stack[depth] = node;
                starts[depth] = pos;
            }
        }

        prev = curr;
    }

    Ok(BehaviourStreams {
        internal: internal.finish()?,
        external: external.finish()?,
    })
}
