use super::query::Row;

/// Iterator over the values packed in a [`Row`].
///
/// `lengths[i] == -1` marks a NULL; every other length slices the next bytes
/// out of `values`. The slices borrow the row, nothing is copied.
pub struct RowValues<'a> {
    lengths: std::slice::Iter<'a, i64>,
    values: &'a [u8],
    offset: usize,
}

impl Row {
    pub fn values(&self) -> RowValues<'_> {
        RowValues {
            lengths: self.lengths.iter(),
            values: &self.values,
            offset: 0,
        }
    }
}

impl<'a> Iterator for RowValues<'a> {
    type Item = Option<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        let len = *self.lengths.next()?;
        if len < 0 {
            return Some(None);
        }
        let start = self.offset.min(self.values.len());
        let end = start.saturating_add(len as usize).min(self.values.len());
        self.offset = end;
        Some(Some(&self.values[start..end]))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.lengths.size_hint()
    }
}

/// Packs column values into a [`Row`]; `None` becomes NULL.
pub fn make_row<'a, I>(values: I) -> Row
where
    I: IntoIterator<Item = Option<&'a [u8]>>,
{
    let mut row = Row::default();
    for value in values {
        match value {
            Some(bytes) => {
                row.lengths.push(bytes.len() as i64);
                row.values.extend_from_slice(bytes);
            }
            None => row.lengths.push(-1),
        }
    }
    row
}
