//! Splitting a file into fixed-size parts

use crate::{CoreError, PartSpec, RemoteLimits, Result};

/// The immutable part layout of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    file_size: u64,
    part_size: u64,
    part_count: u32,
}

impl PartPlan {
    /// Plan `file_size` bytes in parts of `part_size` bytes.
    ///
    /// Every part except the last is exactly `part_size` long; a file
    /// smaller than `part_size` becomes a single part.
    pub fn new(file_size: u64, part_size: u64) -> Result<Self> {
        if file_size == 0 {
            return Err(CoreError::invalid_config("source file is empty"));
        }
        if part_size == 0 {
            return Err(CoreError::invalid_config("part size must be positive"));
        }

        let part_count = u32::try_from(file_size.div_ceil(part_size)).map_err(|_| {
            CoreError::invalid_config(format!(
                "{} bytes in parts of {} bytes exceeds the part number range",
                file_size, part_size
            ))
        })?;

        Ok(PartPlan {
            file_size,
            part_size,
            part_count,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn len(&self) -> u32 {
        self.part_count
    }

    /// A valid plan always has at least one part
    pub fn is_empty(&self) -> bool {
        self.part_count == 0
    }

    /// Byte range of 1-based `part_number`, if it is in the plan
    pub fn part(&self, part_number: u32) -> Option<PartSpec> {
        if part_number == 0 || part_number > self.part_count {
            return None;
        }
        let byte_offset = u64::from(part_number - 1) * self.part_size;
        let byte_length = self.part_size.min(self.file_size - byte_offset);
        Some(PartSpec {
            part_number,
            byte_offset,
            byte_length,
        })
    }

    /// Lazily yield every part in ascending order, starting over each call
    pub fn iter(&self) -> PartIter {
        PartIter {
            plan: *self,
            next: 1,
        }
    }

    /// Reject plans the remote would refuse
    pub fn check_limits(&self, limits: &RemoteLimits) -> Result<()> {
        if self.part_count > 1 && self.part_size < limits.min_part_size {
            return Err(CoreError::invalid_config(format!(
                "part size {} is below the remote minimum of {} bytes",
                self.part_size, limits.min_part_size
            )));
        }
        if self.part_count > limits.max_parts {
            return Err(CoreError::invalid_config(format!(
                "{} parts exceeds the remote maximum of {}; raise the part size",
                self.part_count, limits.max_parts
            )));
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a PartPlan {
    type Item = PartSpec;
    type IntoIter = PartIter;

    fn into_iter(self) -> PartIter {
        self.iter()
    }
}

/// Iterator over the parts of a [`PartPlan`]
#[derive(Debug, Clone)]
pub struct PartIter {
    plan: PartPlan,
    next: u32,
}

impl Iterator for PartIter {
    type Item = PartSpec;

    fn next(&mut self) -> Option<PartSpec> {
        let spec = self.plan.part(self.next)?;
        // wraps to 0, which is never a part number
        self.next = self.next.wrapping_add(1);
        Some(spec)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.next == 0 {
            return (0, Some(0));
        }
        let remaining =
            (u64::from(self.plan.part_count) + 1).saturating_sub(u64::from(self.next)) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PartIter {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_parts_with_short_tail() {
        let plan = PartPlan::new(26_000_000, 10_000_000).unwrap();
        let parts: Vec<_> = plan.iter().collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(
            parts.iter().map(|p| p.part_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(
            parts.iter().map(|p| p.byte_length).collect::<Vec<_>>(),
            vec![10_000_000, 10_000_000, 6_000_000]
        );
        assert_eq!(parts[2].byte_offset, 20_000_000);
        assert_eq!(parts[2].end(), 26_000_000);
    }

    #[test]
    fn test_tiny_file_is_one_part() {
        let plan = PartPlan::new(1, 10_000_000).unwrap();
        let parts: Vec<_> = plan.iter().collect();

        assert_eq!(
            parts,
            vec![PartSpec {
                part_number: 1,
                byte_offset: 0,
                byte_length: 1
            }]
        );
    }

    #[test]
    fn test_exact_multiple_has_no_short_part() {
        let plan = PartPlan::new(30, 10).unwrap();
        assert_eq!(plan.len(), 3);
        assert!(plan.iter().all(|p| p.byte_length == 10));
    }

    #[test]
    fn test_rejects_empty_file_and_zero_part_size() {
        assert!(matches!(
            PartPlan::new(0, 10),
            Err(CoreError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            PartPlan::new(10, 0),
            Err(CoreError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_iteration_restarts() {
        let plan = PartPlan::new(25, 10).unwrap();
        let mut first = plan.iter();
        first.next();
        assert_eq!(first.len(), 2);

        let again: Vec<_> = plan.iter().map(|p| p.part_number).collect();
        assert_eq!(again, vec![1, 2, 3]);
    }

    #[test]
    fn test_part_lookup_out_of_range() {
        let plan = PartPlan::new(25, 10).unwrap();
        assert!(plan.part(0).is_none());
        assert!(plan.part(4).is_none());
        assert_eq!(plan.part(3).unwrap().byte_length, 5);
    }

    #[test]
    fn test_limits() {
        let limits = RemoteLimits {
            min_part_size: 10,
            max_parts: 3,
        };

        // A single short part is always allowed
        assert!(PartPlan::new(4, 5).unwrap().check_limits(&limits).is_ok());
        assert!(PartPlan::new(30, 10).unwrap().check_limits(&limits).is_ok());

        // Below the minimum with more than one part
        assert!(PartPlan::new(12, 5).unwrap().check_limits(&limits).is_err());
        // Too many parts
        assert!(PartPlan::new(40, 10).unwrap().check_limits(&limits).is_err());
    }
}
