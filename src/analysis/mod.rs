/// Reshaping layer: turns hierarchically indexed tables into what plots
/// and fits consume.
///
/// ```text
///   Table (any index depth)
///        │
///        ▼
///   ┌──────────┐
///   │  index    │  fold extra levels → (dataset, sample)
///   └──────────┘
///        │
///        ├──────────────┬───────────────┐
///        ▼              ▼               ▼
///   ┌──────────┐  ┌───────────┐  ┌────────────┐
///   │  pivot    │  │  extract   │  │  collapse   │
///   └──────────┘  └───────────┘  └────────────┘
///   X/Y/Z grids     per-dataset      one summary row
///        │          vectors/matrices per dataset
///        ▼
///   ticks, waterfall
/// ```

pub mod collapse;
pub mod extract;
pub mod index;
pub mod pivot;
pub mod ticks;
pub mod waterfall;
