pub const SCHEMA: &str = r#"
-- Photos: one row per file path, updated in place on reprocessing
CREATE TABLE IF NOT EXISTS photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL UNIQUE,
    file_name TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    width INTEGER,
    height INTEGER,
    format TEXT,
    created_at TEXT NOT NULL,
    processed_at TEXT,         -- NULL until detections are committed
    model_used TEXT
);

CREATE INDEX IF NOT EXISTS idx_photos_file_path ON photos(file_path);
CREATE INDEX IF NOT EXISTS idx_photos_created_at ON photos(created_at);

-- EXIF: at most one row per photo
CREATE TABLE IF NOT EXISTS exif_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    photo_id INTEGER NOT NULL UNIQUE,
    camera_make TEXT,
    camera_model TEXT,
    software TEXT,
    date_time_original TEXT,   -- ISO-8601, validated
    exposure_time REAL,
    f_number REAL,
    iso_speed INTEGER,
    focal_length REAL,
    gps_latitude REAL,
    gps_longitude REAL,
    gps_altitude REAL,
    FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE
);

-- Raw object detector output
CREATE TABLE IF NOT EXISTS object_detections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    photo_id INTEGER NOT NULL,
    class_name TEXT NOT NULL,
    class_id INTEGER NOT NULL,
    confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
    FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_object_detections_photo ON object_detections(photo_id);

-- Per-class aggregates, recomputed with the detections
CREATE TABLE IF NOT EXISTS object_summary (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    photo_id INTEGER NOT NULL,
    class_name TEXT NOT NULL,
    class_id INTEGER NOT NULL,
    total_count INTEGER NOT NULL,
    avg_confidence REAL NOT NULL,
    max_confidence REAL NOT NULL,
    UNIQUE (photo_id, class_name),
    FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_object_summary_class ON object_summary(class_name);
CREATE INDEX IF NOT EXISTS idx_object_summary_count ON object_summary(total_count);

-- Reference faces used to build the gallery
CREATE TABLE IF NOT EXISTS known_faces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    image_path TEXT NOT NULL UNIQUE,
    encoding BLOB NOT NULL,    -- little-endian f32 array
    encoding_dim INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_known_faces_name ON known_faces(name);

-- Faces found in photos, optionally matched against the gallery
CREATE TABLE IF NOT EXISTS face_detections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    photo_id INTEGER NOT NULL,
    location_top INTEGER NOT NULL,
    location_right INTEGER NOT NULL,
    location_bottom INTEGER NOT NULL,
    location_left INTEGER NOT NULL,
    confidence REAL,
    recognized_name TEXT,
    recognized_confidence REAL,
    encoding BLOB,
    FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_face_detections_photo ON face_detections(photo_id);
CREATE INDEX IF NOT EXISTS idx_face_detections_name ON face_detections(recognized_name);

-- Per-photo face counts, recomputed with the face detections
CREATE TABLE IF NOT EXISTS face_summary (
    photo_id INTEGER PRIMARY KEY,
    total_faces INTEGER NOT NULL,
    recognized_faces INTEGER NOT NULL,
    unrecognized_faces INTEGER NOT NULL,
    CHECK (total_faces = recognized_faces + unrecognized_faces),
    FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE
);
"#;
