//! Structure dump for interactive/test use, grounded on the teacher's own
//! `dump_structure` (spec asks for nothing here; this is ambient tooling).

use tracing::info;

use crate::extension::DynamicExtension;
use crate::record::Record;
use crate::shard::Shard;

impl<R: Record, S: Shard<R>> DynamicExtension<R, S> {
    /// Logs one line per buffer and one line per populated level.
    pub fn dump_structure(&self) {
        for (i, (len, cap, tombstones)) in self.buffer_snapshot().into_iter().enumerate() {
            info!(buffer = i, len, cap, tombstones, "buffer");
        }

        for (level, reccnt, tombstones, shardcnt) in self.level_snapshot() {
            if reccnt == 0 && shardcnt == 0 {
                continue;
            }
            info!(level, reccnt, tombstones, shardcnt, "level");
        }
    }
}
