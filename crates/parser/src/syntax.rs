use std::ops::Range;

use pest::iterators::Pair;

#[derive(pest_derive::Parser)]
#[grammar = "stitch.pest"]
pub struct Parser;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Span(pub u32, pub u32);

impl Span {
    pub fn from_range(r: Range<usize>) -> Self {
        Self(r.start as u32, r.end as u32)
    }

    pub fn of(pair: &Pair<'_, Rule>) -> Self {
        let s = pair.as_span();
        Self::from_range(s.start()..s.end())
    }

    pub fn as_range(&self) -> Range<usize> {
        self.0 as usize..self.1 as usize
    }
}

#[derive(Debug, Clone)]
pub struct Spanned<T> {
    pub span: Span,
    pub inner: T,
}

impl<T> Spanned<T> {
    pub fn new(inner: T, span: Span) -> Self {
        Self { span, inner }
    }
}

impl<T> AsRef<T> for Spanned<T> {
    fn as_ref(&self) -> &T {
        &self.inner
    }
}

impl<T> AsMut<T> for Spanned<T> {
    fn as_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

pub trait FromSyntax: Sized {
    fn from_syntax(pair: Pair<'_, Rule>) -> Self;
}

impl<T: FromSyntax> FromSyntax for Spanned<T> {
    fn from_syntax(pair: Pair<'_, Rule>) -> Self {
        let span = Span::of(&pair);
        Self {
            span,
            inner: T::from_syntax(pair),
        }
    }
}

/// Inner pairs of `pair`, without comments.
pub fn children<'i>(pair: Pair<'i, Rule>) -> impl Iterator<Item = Pair<'i, Rule>> {
    pair.into_inner().filter(|p| p.as_rule() != Rule::COMMENT)
}
