use super::Label;
use crate::dex::Error;

/// Exception handler range as registered on the stream, before coalescing
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TryRange {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    pub exception_type: Option<String>,
}

/// Handler of a try block (`None` is the catch-all)
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ExceptionHandler {
    pub exception_type: Option<String>,
    pub handler_address: u32,
}

/// Non-overlapping range of code units with its ordered handlers
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct TryBlock {
    pub start_address: u32,
    pub code_unit_count: u32,
    pub handlers: Vec<ExceptionHandler>,
}

impl TryBlock {
    pub fn end_address(&self) -> u32 {
        self.start_address + self.code_unit_count
    }
}

/// Turn possibly overlapping `(start, end, handler)` ranges into sorted, disjoint try blocks
///
/// Every sub-range gets the handlers of all ranges covering it, in the order ranges were given.
/// Adjacent sub-ranges that end up with the same handlers are merged. A sub-range covered by two
/// different handlers for the same exception type is an error, since only the first would ever
/// run.
pub fn coalesce_try_ranges(
    ranges: &[(u32, u32, ExceptionHandler)],
) -> Result<Vec<TryBlock>, Error> {
    let mut boundaries: Vec<u32> = ranges
        .iter()
        .filter(|(start, end, _)| start < end)
        .flat_map(|(start, end, _)| [*start, *end])
        .collect();
    boundaries.sort_unstable();
    boundaries.dedup();

    let mut blocks: Vec<TryBlock> = vec![];
    for window in boundaries.windows(2) {
        let (low, high) = (window[0], window[1]);

        let mut handlers: Vec<ExceptionHandler> = vec![];
        for (start, end, handler) in ranges {
            if *start <= low && high <= *end {
                add_handler(&mut handlers, handler)?;
            }
        }
        if handlers.is_empty() {
            continue;
        }

        match blocks.last_mut() {
            Some(last) if last.end_address() == low && last.handlers == handlers => {
                last.code_unit_count += high - low;
            }
            _ => blocks.push(TryBlock {
                start_address: low,
                code_unit_count: high - low,
                handlers,
            }),
        }
    }
    Ok(blocks)
}

fn add_handler(
    handlers: &mut Vec<ExceptionHandler>,
    handler: &ExceptionHandler,
) -> Result<(), Error> {
    match handlers
        .iter()
        .find(|existing| existing.exception_type == handler.exception_type)
    {
        Some(existing) if existing.handler_address != handler.handler_address => {
            Err(Error::OverlappingCatches {
                exception_type: handler.exception_type.clone(),
            })
        }
        Some(_) => Ok(()),
        None => {
            handlers.push(handler.clone());
            Ok(())
        }
    }
}
