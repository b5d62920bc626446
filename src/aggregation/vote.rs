/// True/false counts for one flag across a window. Samples that did not
/// report the flag are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub yes: usize,
    pub no: usize,
}

impl Tally {
    pub fn from_votes<I>(votes: I) -> Self
    where
        I: IntoIterator<Item = Option<bool>>,
    {
        votes.into_iter().fold(Self::default(), |mut tally, vote| {
            match vote {
                Some(true) => tally.yes += 1,
                Some(false) => tally.no += 1,
                None => {}
            }
            tally
        })
    }

    /// Strict majority; ties (including 0:0) resolve to `false`.
    pub fn winner(&self) -> bool {
        self.yes > self.no
    }

    pub fn reported(&self) -> usize {
        self.yes + self.no
    }
}

pub fn majority<I>(votes: I) -> bool
where
    I: IntoIterator<Item = Option<bool>>,
{
    Tally::from_votes(votes).winner()
}
