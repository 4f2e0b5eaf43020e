//! Remove-by-predicate for ordered sequences

use std::collections::VecDeque;

/// Remove every element matching a predicate and hand the removed elements back.
///
/// The scan runs from the back so indices of not-yet-visited elements stay
/// valid while removing. Removed elements come back in reverse of their
/// original order; survivors keep their relative order.
pub trait RemoveBy<T> {
    fn remove_by<P>(&mut self, predicate: P) -> Vec<T>
    where
        P: FnMut(&T) -> bool;
}

impl<T> RemoveBy<T> for Vec<T> {
    fn remove_by<P>(&mut self, mut predicate: P) -> Vec<T>
    where
        P: FnMut(&T) -> bool,
    {
        let mut removed = Vec::new();
        let mut index = self.len();
        while index > 0 {
            index -= 1;
            if predicate(&self[index]) {
                removed.push(self.remove(index));
            }
        }
        removed
    }
}

impl<T> RemoveBy<T> for VecDeque<T> {
    fn remove_by<P>(&mut self, mut predicate: P) -> Vec<T>
    where
        P: FnMut(&T) -> bool,
    {
        let mut removed = Vec::new();
        let mut index = self.len();
        while index > 0 {
            index -= 1;
            if predicate(&self[index]) {
                removed.extend(self.remove(index));
            }
        }
        removed
    }
}
