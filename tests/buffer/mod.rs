mod projected;
mod selection;
