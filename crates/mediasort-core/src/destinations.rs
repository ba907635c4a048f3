//! Rank bookkeeping for sort destinations.
//!
//! Ranks are contiguous from zero, with no gaps or duplicates, and there are at most
//! [`MAX_SORT_DESTINATIONS`]. Every mutation here re-packs so that holds afterwards.

use crate::config::MAX_SORT_DESTINATIONS;
use crate::error::StoreError;
use crate::model::SortDestination;

/// Checks that `destinations`, in any order, hold ranks `0..len` exactly once each.
pub fn validate_ranks(destinations: &[SortDestination]) -> Result<(), StoreError> {
    let len = destinations.len();
    if len > MAX_SORT_DESTINATIONS {
        return Err(StoreError::TooManyDestinations {
            max: MAX_SORT_DESTINATIONS,
        });
    }
    let mut seen = [false; MAX_SORT_DESTINATIONS];
    for dest in destinations {
        let rank = dest.rank as usize;
        if rank >= len || seen[rank] {
            return Err(StoreError::RankOutOfRange { rank: dest.rank, len });
        }
        seen[rank] = true;
    }
    Ok(())
}

/// Sorts by rank and renumbers from zero.
pub fn repack(destinations: &mut [SortDestination]) {
    destinations.sort_by_key(|d| d.rank);
    for (index, dest) in destinations.iter_mut().enumerate() {
        dest.rank = index as u8;
    }
}

/// Inserts `destination` at its rank, shifting later ones down. A rank past the end appends.
pub fn insert(destinations: &mut Vec<SortDestination>, mut destination: SortDestination) -> Result<(), StoreError> {
    if destinations.len() >= MAX_SORT_DESTINATIONS {
        return Err(StoreError::TooManyDestinations {
            max: MAX_SORT_DESTINATIONS,
        });
    }
    repack(destinations);
    let at = (destination.rank as usize).min(destinations.len());
    destination.rank = at as u8;
    destinations.insert(at, destination);
    repack_in_order(destinations);
    Ok(())
}

/// Removes the destination at `rank` and closes the gap.
pub fn remove_and_repack(destinations: &mut Vec<SortDestination>, rank: u8) -> Result<SortDestination, StoreError> {
    repack(destinations);
    let len = destinations.len();
    if rank as usize >= len {
        return Err(StoreError::RankOutOfRange { rank, len });
    }
    let removed = destinations.remove(rank as usize);
    repack_in_order(destinations);
    Ok(removed)
}

/// Moves the destination at rank `from` to rank `to`.
pub fn reorder(destinations: &mut [SortDestination], from: u8, to: u8) -> Result<(), StoreError> {
    repack(destinations);
    let len = destinations.len();
    for rank in [from, to] {
        if rank as usize >= len {
            return Err(StoreError::RankOutOfRange { rank, len });
        }
    }
    let (from, to) = (from as usize, to as usize);
    if from < to {
        destinations[from..=to].rotate_left(1);
    } else {
        destinations[to..=from].rotate_right(1);
    }
    repack_in_order(destinations);
    Ok(())
}

/// Renumbers by current position.
fn repack_in_order(destinations: &mut [SortDestination]) {
    for (index, dest) in destinations.iter_mut().enumerate() {
        dest.rank = index as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConnectionDescriptor;

    fn dest(label: &str, rank: u8) -> SortDestination {
        SortDestination::new(
            ConnectionDescriptor::remote(rank as i64 + 1, "nas", format!("share/{}", label), None),
            label,
            rank,
        )
    }

    fn labels(destinations: &[SortDestination]) -> Vec<(&str, u8)> {
        destinations.iter().map(|d| (d.label.as_str(), d.rank)).collect()
    }

    #[test]
    fn removing_rank_two_of_four_repacks() {
        let mut list = vec![dest("a", 0), dest("b", 1), dest("c", 2), dest("d", 3)];
        let removed = remove_and_repack(&mut list, 2).unwrap();
        assert_eq!(removed.label, "c");
        assert_eq!(labels(&list), vec![("a", 0), ("b", 1), ("d", 2)]);
        assert!(validate_ranks(&list).is_ok());
    }

    #[test]
    fn remove_out_of_range() {
        let mut list = vec![dest("a", 0)];
        assert_eq!(
            remove_and_repack(&mut list, 3),
            Err(StoreError::RankOutOfRange { rank: 3, len: 1 })
        );
    }

    #[test]
    fn insert_shifts_later_ranks() {
        let mut list = vec![dest("a", 0), dest("b", 1)];
        insert(&mut list, dest("x", 1)).unwrap();
        assert_eq!(labels(&list), vec![("a", 0), ("x", 1), ("b", 2)]);

        insert(&mut list, dest("tail", 9)).unwrap();
        assert_eq!(list.last().map(|d| d.rank), Some(3));
    }

    #[test]
    fn insert_caps_at_ten() {
        let mut list: Vec<_> = (0..10).map(|i| dest(&format!("d{}", i), i)).collect();
        assert_eq!(
            insert(&mut list, dest("extra", 0)),
            Err(StoreError::TooManyDestinations { max: 10 })
        );
    }

    #[test]
    fn reorder_both_directions() {
        let mut list = vec![dest("a", 0), dest("b", 1), dest("c", 2), dest("d", 3)];
        reorder(&mut list, 0, 2).unwrap();
        assert_eq!(labels(&list), vec![("b", 0), ("c", 1), ("a", 2), ("d", 3)]);
        reorder(&mut list, 3, 0).unwrap();
        assert_eq!(labels(&list), vec![("d", 0), ("b", 1), ("c", 2), ("a", 3)]);
    }

    #[test]
    fn validate_rejects_gaps_and_duplicates() {
        assert!(validate_ranks(&[dest("a", 0), dest("b", 2)]).is_err());
        assert!(validate_ranks(&[dest("a", 0), dest("b", 0)]).is_err());
        assert!(validate_ranks(&[dest("b", 1), dest("a", 0)]).is_ok());
    }
}
