use image::{GrayImage, Luma};

const NEIGHBORS: [(i32, i32); 8] = [
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
];

/// Zhang-Suen thinning of a binary image (non-zero = foreground) to 1-pixel-wide curves.
pub fn thin(binary: &GrayImage) -> GrayImage {
    let (width, height) = binary.dimensions();
    let (w, h) = (width as i32, height as i32);
    let mut px: Vec<u8> = binary.pixels().map(|p| u8::from(p[0] > 0)).collect();

    let at = |px: &[u8], x: i32, y: i32| -> u8 {
        if x < 0 || y < 0 || x >= w || y >= h {
            0
        } else {
            px[(y * w + x) as usize]
        }
    };

    let mut to_clear = Vec::new();
    loop {
        let mut changed = false;
        for pass in 0..2 {
            to_clear.clear();
            for y in 0..h {
                for x in 0..w {
                    if px[(y * w + x) as usize] == 0 {
                        continue;
                    }
                    // P2..P9, clockwise from north
                    let n: [u8; 8] = std::array::from_fn(|i| {
                        let (dx, dy) = NEIGHBORS[i];
                        at(&px, x + dx, y + dy)
                    });
                    let count: u8 = n.iter().sum();
                    if !(2..=6).contains(&count) {
                        continue;
                    }
                    let transitions = (0..8).filter(|&i| n[i] == 0 && n[(i + 1) % 8] == 1).count();
                    if transitions != 1 {
                        continue;
                    }
                    let (p2, p4, p6, p8) = (n[0], n[2], n[4], n[6]);
                    let keep = if pass == 0 {
                        p2 * p4 * p6 != 0 || p4 * p6 * p8 != 0
                    } else {
                        p2 * p4 * p8 != 0 || p2 * p6 * p8 != 0
                    };
                    if !keep {
                        to_clear.push((y * w + x) as usize);
                    }
                }
            }
            if !to_clear.is_empty() {
                changed = true;
                for &i in &to_clear {
                    px[i] = 0;
                }
            }
        }
        if !changed {
            break;
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        Luma([if px[(y * width + x) as usize] > 0 { 255 } else { 0 }])
    })
}

/// Walk order: orthogonal neighbours first, so staircase pixels are not skipped.
const WALK_ORDER: [(i32, i32); 8] = [
    (0, -1),
    (1, 0),
    (0, 1),
    (-1, 0),
    (1, -1),
    (1, 1),
    (-1, 1),
    (-1, -1),
];

/// Half-width (in path pixels) of the window used to measure turning.
const CORNER_WINDOW: usize = 6;
/// A branch is cut where its direction turns by more than this.
const CORNER_ANGLE_DEG: f32 = 60.0;

/// One unbranched piece of skeleton as an ordered pixel path.
#[derive(Debug, Clone)]
pub struct TracedBranch {
    /// Pixels in path order; a junction pixel may end several branches
    pub path: Vec<(u32, u32)>,
}

impl TracedBranch {
    pub fn pixel_count(&self) -> u32 {
        self.path.len() as u32
    }

    pub fn path_length(&self) -> f32 {
        self.path
            .windows(2)
            .map(|w| {
                let dx = w[0].0 as f32 - w[1].0 as f32;
                let dy = w[0].1 as f32 - w[1].1 as f32;
                (dx * dx + dy * dy).sqrt()
            })
            .sum()
    }
}

struct SkeletonMap<'a> {
    image: &'a GrayImage,
    junction: Vec<bool>,
    visited: Vec<bool>,
}

impl<'a> SkeletonMap<'a> {
    fn new(image: &'a GrayImage) -> Self {
        let (width, height) = image.dimensions();
        let mut map = Self {
            image,
            junction: vec![false; (width * height) as usize],
            visited: vec![false; (width * height) as usize],
        };
        for y in 0..height as i32 {
            for x in 0..width as i32 {
                if map.on(x, y) && map.crossings(x, y) >= 3 {
                    let i = map.index(x, y);
                    map.junction[i] = true;
                }
            }
        }
        map
    }

    fn on(&self, x: i32, y: i32) -> bool {
        let (width, height) = self.image.dimensions();
        x >= 0
            && y >= 0
            && (x as u32) < width
            && (y as u32) < height
            && self.image.get_pixel(x as u32, y as u32)[0] > 0
    }

    fn index(&self, x: i32, y: i32) -> usize {
        (y as u32 * self.image.width() + x as u32) as usize
    }

    /// Number of separate foreground runs around the pixel: 1 at an end, 2 on a curve,
    /// 3 or more where branches meet.
    fn crossings(&self, x: i32, y: i32) -> usize {
        let n: [bool; 8] = std::array::from_fn(|i| {
            let (dx, dy) = NEIGHBORS[i];
            self.on(x + dx, y + dy)
        });
        (0..8).filter(|&i| !n[i] && n[(i + 1) % 8]).count()
    }

    fn is_junction(&self, x: i32, y: i32) -> bool {
        self.junction[self.index(x, y)]
    }

    /// Unvisited non-junction pixel next to `(x, y)`, if any.
    fn next_free(&self, x: i32, y: i32) -> Option<(i32, i32)> {
        WALK_ORDER
            .iter()
            .map(|(dx, dy)| (x + dx, y + dy))
            .find(|&(nx, ny)| {
                self.on(nx, ny) && !self.is_junction(nx, ny) && !self.visited[self.index(nx, ny)]
            })
    }

    fn adjacent_junctions(&self, x: i32, y: i32) -> Vec<(i32, i32)> {
        WALK_ORDER
            .iter()
            .map(|(dx, dy)| (x + dx, y + dy))
            .filter(|&(nx, ny)| self.on(nx, ny) && self.is_junction(nx, ny))
            .collect()
    }

    /// Follow free pixels from `first` until the branch ends, optionally starting at a junction.
    fn walk(&mut self, from: Option<(i32, i32)>, first: (i32, i32)) -> Vec<(u32, u32)> {
        let mut path: Vec<(i32, i32)> = from.into_iter().collect();
        path.push(first);
        let i = self.index(first.0, first.1);
        self.visited[i] = true;

        let mut cur = first;
        while let Some(next) = self.next_free(cur.0, cur.1) {
            let i = self.index(next.0, next.1);
            self.visited[i] = true;
            path.push(next);
            cur = next;
        }

        // Close the branch on a junction, preferring one other than where it started
        let junctions = self.adjacent_junctions(cur.0, cur.1);
        let end = junctions
            .iter()
            .copied()
            .find(|j| Some(*j) != from)
            .or_else(|| junctions.first().copied().filter(|_| path.len() > 2));
        if let Some(j) = end {
            path.push(j);
        }
        path.into_iter().map(|(x, y)| (x as u32, y as u32)).collect()
    }
}

/// Split a skeleton into unbranched paths.
///
/// Paths are cut at junction pixels and at sharp corners, so two creases that touch or
/// leave a common point come out as separate branches.
pub fn trace_branches(skeleton: &GrayImage) -> Vec<TracedBranch> {
    let (width, height) = skeleton.dimensions();
    let mut map = SkeletonMap::new(skeleton);
    let mut paths = Vec::new();

    // Branches leaving a junction
    for y in 0..height as i32 {
        for x in 0..width as i32 {
            if !map.on(x, y) || !map.is_junction(x, y) {
                continue;
            }
            while let Some(first) = map.next_free(x, y) {
                paths.push(map.walk(Some((x, y)), first));
            }
        }
    }

    // Free-standing curves from one end, then closed loops from anywhere
    for pass in 0..2 {
        for y in 0..height as i32 {
            for x in 0..width as i32 {
                if !map.on(x, y) || map.is_junction(x, y) || map.visited[map.index(x, y)] {
                    continue;
                }
                if pass == 0 && map.crossings(x, y) > 1 {
                    continue;
                }
                paths.push(map.walk(None, (x, y)));
            }
        }
    }

    paths
        .into_iter()
        .flat_map(split_at_corners)
        .map(|path| TracedBranch { path })
        .collect()
}

fn turn_angle(path: &[(u32, u32)], i: usize, w: usize) -> f32 {
    let (a, b, c) = (path[i - w], path[i], path[i + w]);
    let v1 = (b.0 as f32 - a.0 as f32, b.1 as f32 - a.1 as f32);
    let v2 = (c.0 as f32 - b.0 as f32, c.1 as f32 - b.1 as f32);
    let norm = (v1.0.hypot(v1.1) * v2.0.hypot(v2.1)).max(f32::EPSILON);
    ((v1.0 * v2.0 + v1.1 * v2.1) / norm).clamp(-1.0, 1.0).acos().to_degrees()
}

/// Cut a path at the sharpest point of every run of strong turning.
/// The corner pixel ends one piece and starts the next.
fn split_at_corners(path: Vec<(u32, u32)>) -> Vec<Vec<(u32, u32)>> {
    let w = CORNER_WINDOW;
    if path.len() < 2 * w + 1 {
        return vec![path];
    }

    let mut cuts = Vec::new();
    let mut i = w;
    while i + w < path.len() {
        let angle = turn_angle(&path, i, w);
        if angle <= CORNER_ANGLE_DEG {
            i += 1;
            continue;
        }
        let mut sharpest = (angle, i);
        i += 1;
        while i + w < path.len() {
            let angle = turn_angle(&path, i, w);
            if angle <= CORNER_ANGLE_DEG {
                break;
            }
            if angle > sharpest.0 {
                sharpest = (angle, i);
            }
            i += 1;
        }
        cuts.push(sharpest.1);
    }

    let mut pieces = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for cut in cuts {
        pieces.push(path[start..=cut].to_vec());
        start = cut;
    }
    pieces.push(path[start..].to_vec());
    pieces
}
